use std::{collections::BTreeSet, time::Duration};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    bet::parse_batch,
    draw::RendezvousErr,
    protocol::{Channel, ChannelErr, DecodeErr, Message, MessageType},
    server::SharedState,
    storage::{BetStore, StorageErr},
};

// how long a final NACK may take before the connection is dropped without it
const NACK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
pub enum HandlerErr {
    #[error("{0}")]
    Channel(#[from] ChannelErr),

    #[error("{0}")]
    Storage(#[from] StorageErr),

    #[error("{0}")]
    Draw(#[from] RendezvousErr),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("the server is shutting down")]
    ShuttingDown,
}

/// Drives a single agency connection until it is done
///
/// the connection ends when the agency closes it, after it has been sent its winners,
/// or on the first error. none of these affect any other connection.
pub async fn handle<S, T>(stream: T, shared: SharedState<S>) -> Result<(), HandlerErr>
where
    S: BetStore,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        channel: Channel::new(stream),
        shared,
        agency: None,
        finished: false,
    };

    let result = session.run().await;
    if result.is_ok() {
        // let the agency see a clean EOF, it may already be gone
        let _ = session.channel.close().await;
    }

    result
}

struct Session<S, T> {
    channel: Channel<T>,
    shared: SharedState<S>,
    // learned from the first batch, or from the winners request
    agency: Option<u32>,
    // a FIN has been received on this connection
    finished: bool,
}

impl<S, T> Session<S, T>
where
    S: BetStore,
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(&mut self) -> Result<(), HandlerErr> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => {
                    tracing::debug!("dropping the connection, the server is shutting down");
                    return Ok(());
                }
                received = self.channel.receive() => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!(agency = ?self.agency, "agency closed the connection");
                    return Ok(());
                }
                Err(ChannelErr::Decode(DecodeErr::UnknownType(ty))) => {
                    return self.violation(format!("unknown message type {:?}", ty)).await;
                }
                Err(err) => return Err(err.into()),
            };

            tracing::debug!(
                ty = %message.ty,
                len = message.payload.len(),
                "received message"
            );

            match message.ty {
                MessageType::Batch => self.on_batch(&message.payload).await?,
                MessageType::Fin => self.on_fin(),
                MessageType::GetWinners => return self.on_get_winners(&message.payload).await,
                // only the server sends these
                ty @ (MessageType::Ack | MessageType::Nack | MessageType::Winners) => {
                    return self.violation(format!("unexpected {} from an agency", ty)).await;
                }
            }
        }
    }

    // all or nothing: a single bad record rejects the whole batch
    async fn on_batch(&mut self, payload: &[u8]) -> Result<(), HandlerErr> {
        if self.finished {
            tracing::warn!(agency = ?self.agency, "rejecting a batch sent after FIN");
            return self.reply(Message::nack()).await;
        }

        let Ok(payload) = std::str::from_utf8(payload) else {
            tracing::warn!(agency = ?self.agency, "rejecting a batch that is not valid utf-8");
            return self.reply(Message::nack()).await;
        };

        let batch = parse_batch(payload);
        if !batch.is_valid() {
            tracing::warn!(
                agency = ?self.agency,
                parsed = batch.bets.len(),
                errors = batch.errors,
                "rejecting a batch with malformed bets"
            );
            return self.reply(Message::nack()).await;
        }

        let agencies = batch
            .bets
            .iter()
            .map(|bet| bet.agency)
            .collect::<BTreeSet<_>>();
        for agency in agencies.iter() {
            self.shared.tracker.register(*agency);
        }
        if self.agency.is_none() {
            self.agency = agencies.first().copied();
        }

        let count = batch.bets.len();
        if count > 0 {
            if let Err(err) = self.shared.store.store(batch.bets).await {
                tracing::error!(agency = ?self.agency, count, %err, "failed to store a batch");
                return self.reply(Message::nack()).await;
            }
        }

        tracing::info!(agency = ?self.agency, count, "stored a batch of bets");
        self.reply(Message::ack()).await
    }

    fn on_fin(&mut self) {
        if self.finished {
            tracing::debug!(agency = ?self.agency, "ignoring a repeated FIN");
            return;
        }
        self.finished = true;

        // without a batch the agency is only known once it asks for its winners
        if let Some(agency) = self.agency {
            if self.shared.tracker.mark_finished(agency) {
                tracing::info!(agency, "agency finished sending bets");
            }
        }
    }

    async fn on_get_winners(&mut self, payload: &[u8]) -> Result<(), HandlerErr> {
        let agency = std::str::from_utf8(payload)
            .ok()
            .and_then(|text| text.trim().parse::<u32>().ok())
            .filter(|agency| *agency > 0);
        let Some(agency) = agency else {
            return self
                .violation(format!(
                    "invalid agency id {:?}",
                    String::from_utf8_lossy(payload)
                ))
                .await;
        };

        match self.agency {
            Some(known) if known != agency => {
                tracing::warn!(known, agency, "agency asked for the winners of another agency")
            }
            _ => {}
        }
        self.agency = Some(agency);
        self.finished = true;
        self.shared.tracker.mark_finished(agency);

        let rendezvous = &self.shared.rendezvous;
        tracing::info!(
            agency,
            arrived = rendezvous.arrived(),
            expected = rendezvous.expected(),
            "waiting for every agency before the draw"
        );

        // the agency has nothing to say while it waits, anything it sends means it left
        let waited = tokio::select! {
            biased;
            arrival = rendezvous.arrive_and_wait(
                agency,
                self.shared.draw_timeout,
                &self.shared.shutdown,
            ) => Ok(arrival),
            received = self.channel.receive() => Err(received),
        };

        // dropping the arrival above withdraws the agency from the draw
        let arrival = match waited {
            Ok(Ok(arrival)) => arrival,
            Ok(Err(err)) => {
                tracing::warn!(
                    agency,
                    pending = ?self.shared.tracker.pending(),
                    %err,
                    "the draw did not take place"
                );
                self.nack().await;
                return Err(err.into());
            }
            Err(Ok(None)) => {
                tracing::info!(agency, "agency left while waiting for the draw");
                return Ok(());
            }
            Err(Ok(Some(message))) => {
                return self
                    .violation(format!("unexpected {} while waiting for the draw", message.ty))
                    .await;
            }
            Err(Err(err)) => return Err(err.into()),
        };

        if arrival.leader {
            tracing::info!(generation = arrival.generation, "every agency is done, draw held");
        }

        let winners = self.shared.store.winners_for_agency(agency).await?;
        tracing::info!(agency, winners = winners.len(), "sending the winners");

        self.reply(Message::winners(&winners)).await
    }

    // an agency that doesn't read its replies must not hold up a shutdown
    async fn reply(&mut self, message: Message) -> Result<(), HandlerErr> {
        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => return Err(HandlerErr::ShuttingDown),
            sent = self.channel.send(&message) => sent?,
        }
        tracing::debug!(ty = %message.ty, "responded");

        Ok(())
    }

    // best effort, the connection is about to be dropped anyway.
    // bounded by time rather than by shutdown, so waiters released by a shutdown still hear about it
    async fn nack(&mut self) {
        let nack = Message::nack();
        match tokio::time::timeout(NACK_TIMEOUT, self.channel.send(&nack)).await {
            Ok(Ok(())) => tracing::debug!("responded with NACK"),
            Ok(Err(err)) => tracing::debug!(%err, "failed to deliver a NACK"),
            Err(_) => tracing::debug!("gave up delivering a NACK, the agency is not reading"),
        }
    }

    // tells the agency it misbehaved, and terminates the connection
    async fn violation(&mut self, reason: String) -> Result<(), HandlerErr> {
        self.nack().await;

        Err(HandlerErr::ProtocolViolation(reason))
    }
}
