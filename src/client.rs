use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    bet::{Bet, BetParseErr},
    protocol::{message::decode_winners, Channel, ChannelErr, Message, MessageType},
};

/// Keeps every batch well below what a single read on the server side can hold
pub const MAX_BATCH_BYTES: usize = 8 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum AgencyErr {
    #[error("{0}")]
    Channel(#[from] ChannelErr),

    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("invalid bet on line {line}: {reason}")]
    BadRecord { line: usize, reason: BetParseErr },

    #[error("the server closed the connection")]
    Closed,

    #[error("expected {expected} but the server sent {received}")]
    Unexpected {
        expected: MessageType,
        received: MessageType,
    },

    #[error("the server refused to hold the draw")]
    DrawRefused,
}

/// How the server answered the batches of a submission
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// The agency side of the protocol
pub struct Agency<S> {
    id: u32,
    channel: Channel<S>,
    batch_max_amount: usize,
}

impl Agency<TcpStream> {
    pub async fn connect(
        id: u32,
        address: &str,
        batch_max_amount: usize,
    ) -> Result<Self, AgencyErr> {
        let stream = TcpStream::connect(address).await?;
        tracing::info!(agency = id, %address, "connected to the server");

        Ok(Self::new(id, stream, batch_max_amount))
    }
}

impl<S> Agency<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u32, stream: S, batch_max_amount: usize) -> Self {
        Self {
            id,
            channel: Channel::new(stream),
            batch_max_amount: batch_max_amount.max(1),
        }
    }

    /// Sends all the bets, batch by batch, waiting for an answer to each
    ///
    /// a rejected batch is reported and skipped, it does not stop the submission.
    pub async fn send_bets(&mut self, bets: &[Bet]) -> Result<BatchReport, AgencyErr> {
        let mut report = BatchReport::default();

        for payload in split_batches(bets, self.batch_max_amount) {
            self.channel.send(&Message::batch(payload)).await?;

            match self.expect_reply().await?.ty {
                MessageType::Ack => report.accepted += 1,
                MessageType::Nack => {
                    tracing::warn!(agency = self.id, "the server rejected a batch");
                    report.rejected += 1;
                }
                received => {
                    return Err(AgencyErr::Unexpected {
                        expected: MessageType::Ack,
                        received,
                    })
                }
            }
        }

        tracing::info!(
            agency = self.id,
            accepted = report.accepted,
            rejected = report.rejected,
            "finished sending bets"
        );

        Ok(report)
    }

    /// Tells the server there are no more bets coming
    pub async fn finish(&mut self) -> Result<(), AgencyErr> {
        self.channel.send(&Message::fin()).await?;

        Ok(())
    }

    /// Asks for the winners of this agency, waits as long as the draw takes
    pub async fn winners(&mut self) -> Result<Vec<String>, AgencyErr> {
        self.channel.send(&Message::get_winners(self.id)).await?;

        let reply = self.expect_reply().await?;
        match reply.ty {
            MessageType::Winners => {
                let text = String::from_utf8_lossy(&reply.payload);
                Ok(decode_winners(&text))
            }
            MessageType::Nack => Err(AgencyErr::DrawRefused),
            received => Err(AgencyErr::Unexpected {
                expected: MessageType::Winners,
                received,
            }),
        }
    }

    pub async fn close(self) -> Result<(), AgencyErr> {
        self.channel.close().await?;

        Ok(())
    }

    async fn expect_reply(&mut self) -> Result<Message, AgencyErr> {
        self.channel.receive().await?.ok_or(AgencyErr::Closed)
    }
}

/// Reads an agency's bets file
///
/// every line holds `first_name,last_name,document,birthdate,number`,
/// the agency id is added in front of each of them.
pub fn read_bets(agency: u32, content: &str) -> Result<Vec<Bet>, AgencyErr> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            format!("{},{}", agency, line)
                .parse::<Bet>()
                .map_err(|reason| AgencyErr::BadRecord {
                    line: idx + 1,
                    reason,
                })
        })
        .collect()
}

/// Groups bets into batch payloads, bounded both in bet count and in bytes
pub fn split_batches(bets: &[Bet], max_amount: usize) -> Vec<String> {
    let mut batches = vec![];
    let mut current = String::new();
    let mut count = 0;

    for bet in bets {
        let line = format!("{}\n", bet);

        let full = count == max_amount || current.len() + line.len() > MAX_BATCH_BYTES;
        if count > 0 && full {
            batches.push(std::mem::take(&mut current));
            count = 0;
        }

        current.push_str(&line);
        count += 1;
    }

    if count > 0 {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::{read_bets, split_batches, Agency, AgencyErr, MAX_BATCH_BYTES};
    use crate::{
        bet::BetParseErr,
        protocol::{Channel, Message, MessageType},
    };

    const BETS: &str = "Ana,Diaz,30111222,1990-01-01,4521\n\
                        Luis,Paz,27444555,1985-06-30,7574\n\
                        \n\
                        Eva,Sosa,33000111,2000-12-31,0001\n";

    #[test]
    fn read_an_agency_file() {
        let bets = read_bets(4, BETS).unwrap();
        assert_eq!(bets.len(), 3);
        assert!(bets.iter().all(|bet| bet.agency == 4));
        assert_eq!(bets[2].number, "0001");

        let err = read_bets(4, "Ana,Diaz,30111222,1990-01-01,4521\nLuis,Paz\n").unwrap_err();
        assert!(matches!(
            err,
            AgencyErr::BadRecord {
                line: 2,
                reason: BetParseErr::FieldCount(3)
            }
        ));
    }

    #[test]
    fn split_by_amount() {
        let bets = read_bets(1, BETS).unwrap();

        let batches = split_batches(&bets, 2);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].lines().count(), 2);
        assert_eq!(batches[1], "1,Eva,Sosa,33000111,2000-12-31,0001\n");

        assert_eq!(split_batches(&bets, 100).len(), 1);
        assert!(split_batches(&[], 100).is_empty());
    }

    #[test]
    fn split_by_size() {
        let line = "Ana,Diaz,30111222,1990-01-01,4521\n";
        let bets = read_bets(1, &line.repeat(1000)).unwrap();

        let batches = split_batches(&bets, 1000);
        assert!(batches.len() > 1);
        assert!(batches.iter().all(|batch| batch.len() <= MAX_BATCH_BYTES));
        assert_eq!(
            batches.iter().map(|batch| batch.lines().count()).sum::<usize>(),
            1000
        );
    }

    #[tokio::test]
    async fn agency_conversation() {
        let (client, server) = tokio::io::duplex(1024);
        let mut server = Channel::new(server);

        let peer = tokio::spawn(async move {
            let mut batches = 0;
            while let Some(message) = server.receive().await.unwrap() {
                match message.ty {
                    MessageType::Batch => {
                        batches += 1;
                        // reject the second batch only
                        let reply = if batches == 2 {
                            Message::nack()
                        } else {
                            Message::ack()
                        };
                        server.send(&reply).await.unwrap();
                    }
                    MessageType::Fin => {}
                    MessageType::GetWinners => {
                        assert_eq!(message.text().unwrap(), "7");
                        server
                            .send(&Message::winners(&["27444555"]))
                            .await
                            .unwrap();
                    }
                    ty => panic!("unexpected {}", ty),
                }
            }
            batches
        });

        let mut agency = Agency::new(7, client, 1);
        let report = agency.send_bets(&read_bets(7, BETS).unwrap()).await.unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);

        agency.finish().await.unwrap();
        assert_eq!(agency.winners().await.unwrap(), ["27444555"]);
        agency.close().await.unwrap();

        assert_eq!(peer.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn refused_draw() {
        let (client, server) = tokio::io::duplex(1024);
        let mut server = Channel::new(server);
        tokio::spawn(async move {
            let _ = server.receive().await;
            server.send(&Message::nack()).await.unwrap();
        });

        let mut agency = Agency::new(1, client, 10);
        assert!(matches!(
            agency.winners().await,
            Err(AgencyErr::DrawRefused)
        ));
    }
}
