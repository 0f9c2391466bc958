//! Live ECU driver over SocketCAN
//!
//! Unlocks SecurityAccess level 3, then cooperatively polls the DID
//! catalog: one in-flight RDBI at a time, per-DID rate limits, and a
//! fingerprint check that keeps unchanged ECU state out of the hub and
//! the raw log. A background task sends TesterPresent every two seconds
//! through the same client, so the keepalive serializes against polls
//! on the shared link.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use husk_ecu::{generate_key, POLL_TABLE};
use husk_uds::transport::user_space::IsoTpLink;
use husk_uds::wire::{CAN_ID_REQUEST, CAN_ID_RESPONSE};
use husk_uds::UdsClient;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::Driver;
use crate::backoff::Backoff;
use crate::emitter::SampleEmitter;
use crate::poll::{NextPoll, PollSchedule};
use crate::rawlog::{RawLog, LOG_EXT, LOG_NAME};

const TESTER_PRESENT_PERIOD: Duration = Duration::from_secs(2);
const KEY_ATTEMPTS: u32 = 3;
const KEY_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct SocketCanDriver {
    interface: String,
    log_dir: PathBuf,
    emitter: SampleEmitter,
    shutdown: watch::Receiver<bool>,
    client: Option<Arc<UdsClient>>,
    rawlog: Option<RawLog>,
    schedule: PollSchedule,
    backoff: Backoff,
    start: Instant,
}

impl SocketCanDriver {
    pub fn new(
        interface: String,
        log_dir: PathBuf,
        emitter: SampleEmitter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            interface,
            log_dir,
            emitter,
            shutdown,
            client: None,
            rawlog: None,
            schedule: PollSchedule::new(POLL_TABLE),
            backoff: Backoff::new(),
            start: Instant::now(),
        }
    }

    async fn poll_loop(&mut self, client: &UdsClient) -> anyhow::Result<()> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let index = match self.schedule.next(Instant::now()) {
                NextPoll::Idle(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.shutdown.changed() => return Ok(()),
                    }
                    continue;
                }
                NextPoll::Due(index) => index,
            };

            let did = self.schedule.did(index);
            let result = client.read_data_by_identifier(did).await;
            self.schedule.mark_attempt(index, Instant::now());

            match result {
                Ok(data) => {
                    self.backoff.reset();
                    if !data.is_empty() && self.schedule.note_response(index, &data) {
                        self.emitter.emit(did as u32, &data);

                        let millis = self.start.elapsed().as_millis() as u32;
                        if let Some(log) = self.rawlog.as_mut() {
                            if let Err(e) = log.write_frame(millis, did, &data) {
                                warn!(error = %e, "raw log write failed");
                            }
                        }
                    }
                }
                Err(e) if e.is_out_of_range() => {
                    debug!(did = format!("{did:#06x}"), "DID unknown to this ECU, skipping");
                }
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.step();
                    trace!(did = format!("{did:#06x}"), ?delay, "transient bus error, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => return Ok(()),
                    }
                }
                Err(e) => {
                    debug!(did = format!("{did:#06x}"), error = %e, "request aborted");
                }
            }

            if let Some(log) = self.rawlog.as_mut() {
                let _ = log.flush_if_due();
            }
        }
    }
}

#[async_trait::async_trait]
impl Driver for SocketCanDriver {
    async fn init(&mut self) -> anyhow::Result<()> {
        let link = IsoTpLink::new(
            &self.interface,
            CAN_ID_REQUEST as u16,
            CAN_ID_RESPONSE as u16,
        )
        .with_context(|| format!("opening CAN interface {}", self.interface))?;

        let client = Arc::new(UdsClient::new(Arc::new(link)));
        unlock(&client, 3).await.context("security handshake")?;

        self.rawlog = Some(
            RawLog::create(&self.log_dir, LOG_NAME, LOG_EXT).context("opening raw log")?,
        );
        self.client = Some(client);
        self.start = Instant::now();
        info!(interface = %self.interface, "socket-can driver ready");
        Ok(())
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        let client = self.client.clone().context("driver not initialised")?;

        let keepalive = {
            let client = client.clone();
            let mut shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(TESTER_PRESENT_PERIOD);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = client.tester_present().await {
                                warn!(error = %e, "tester present failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let result = self.poll_loop(&client).await;

        keepalive.abort();
        if let Some(log) = self.rawlog.as_mut() {
            let _ = log.flush();
        }
        result
    }
}

/// Run the seed/key handshake for `level`, with a bounded number of key
/// attempts. A rejected key is fatal to the driver.
pub async fn unlock(client: &UdsClient, level: u8) -> anyhow::Result<()> {
    let seed = client.request_seed(level).await.context("seed request")?;
    let key = generate_key(level, seed)?;

    let mut last_error = None;
    for attempt in 1..=KEY_ATTEMPTS {
        match client.send_key(level, key).await {
            Ok(()) => {
                info!(level, attempt, "security access granted");
                return Ok(());
            }
            Err(e) => {
                warn!(level, attempt, error = %e, "key rejected");
                last_error = Some(e);
                tokio::time::sleep(KEY_RETRY_DELAY).await;
            }
        }
    }
    Err(anyhow::anyhow!(
        "security access denied after {KEY_ATTEMPTS} attempts: {}",
        last_error.expect("at least one attempt")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use husk_uds::transport::mock::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn unlock_computes_the_key_from_the_seed() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(vec![0x67, 0x05, 0xAB, 0xCD]);
        transport.push_response(vec![0x67, 0x06]);

        let client = UdsClient::new(transport.clone());
        unlock(&client, 3).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0], vec![0x27, 0x05]);
        // (0x6F31 * 0xABCD) mod 2^16 = 0xC53D
        assert_eq!(sent[1], vec![0x27, 0x06, 0xC5, 0x3D]);
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_retries_a_rejected_key_then_fails() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(vec![0x67, 0x03, 0x00, 0x01]);
        // Three rejections: invalidKey each time.
        for _ in 0..3 {
            transport.push_response(vec![0x7F, 0x27, 0x35]);
        }

        let client = UdsClient::new(transport.clone());
        assert!(unlock(&client, 2).await.is_err());
        // One seed request plus three key attempts.
        assert_eq!(transport.sent_count(), 4);
        assert_eq!(transport.sent()[1], vec![0x27, 0x04, 0x4D, 0x4E]);
    }
}
