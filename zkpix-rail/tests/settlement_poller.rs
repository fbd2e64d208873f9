//! Settlement poller driven by a scripted rail on paused time.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zkpix_common::{ExternalPaymentRecord, PaymentStatus};
use zkpix_rail::{
    Backoff, PaymentQuery, PaymentRail, PaymentReceipt, PollPolicy, RailError, SettlementPoller,
    StatusPolicy,
};

struct ScriptedRail {
    script: Mutex<VecDeque<&'static str>>,
    polls: AtomicU32,
    statuses: StatusPolicy,
}

impl ScriptedRail {
    fn new(script: &[&'static str]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            polls: AtomicU32::new(0),
            statuses: StatusPolicy::default(),
        }
    }

    fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentRail for ScriptedRail {
    async fn send_payment(&self, _: &str, _: u64) -> Result<PaymentReceipt, RailError> {
        unreachable!("poller never sends")
    }

    async fn payment_status(
        &self,
        query: &PaymentQuery,
    ) -> Result<ExternalPaymentRecord, RailError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some("ERR") => Err(RailError::Status {
                status: 503,
                operation: "payment_status",
            }),
            Some(raw) => {
                let mut record = ExternalPaymentRecord::pending(query.id(), "");
                record.advance(self.statuses.classify(raw), raw);
                Ok(record)
            }
            None => Ok(ExternalPaymentRecord::pending(query.id(), "EM_PROCESSAMENTO")),
        }
    }
}

fn query() -> PaymentQuery {
    PaymentQuery::Sent("req-1".into())
}

#[tokio::test(start_paused = true)]
async fn settles_on_third_observation() {
    let rail = ScriptedRail::new(&["EM_PROCESSAMENTO", "AGUARDANDO", "CONCLUIDA"]);
    let policy = PollPolicy::fixed(Duration::from_secs(2), 5);
    let started = tokio::time::Instant::now();

    let record = SettlementPoller::new(&rail)
        .await_settlement(&query(), &policy, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.status, PaymentStatus::Settled);
    assert_eq!(record.raw_status, "CONCLUIDA");
    assert_eq!(rail.polls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let rail = ScriptedRail::new(&[]);
    let policy = PollPolicy::fixed(Duration::from_secs(1), 4);

    let err = SettlementPoller::new(&rail)
        .await_settlement(&query(), &policy, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RailError::SettlementTimeout { attempts: 4 }));
    assert_eq!(rail.polls(), 4);
}

#[tokio::test(start_paused = true)]
async fn failure_status_short_circuits() {
    let rail = ScriptedRail::new(&["EM_PROCESSAMENTO", "DEVOLVIDA", "CONCLUIDA"]);
    let policy = PollPolicy::fixed(Duration::from_secs(1), 10);

    let err = SettlementPoller::new(&rail)
        .await_settlement(&query(), &policy, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RailError::SettlementFailed { ref status } if status == "DEVOLVIDA"));
    assert_eq!(rail.polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn rail_error_ends_the_poll() {
    let rail = ScriptedRail::new(&["EM_PROCESSAMENTO", "ERR", "CONCLUIDA"]);
    let policy = PollPolicy::fixed(Duration::from_secs(1), 10);

    let err = SettlementPoller::new(&rail)
        .await_settlement(&query(), &policy, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RailError::Status { status: 503, .. }));
    assert_eq!(rail.polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_wait() {
    let rail = ScriptedRail::new(&[]);
    let policy = PollPolicy::fixed(Duration::from_secs(10), 100);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.cancel();
    });

    let err = SettlementPoller::new(&rail)
        .await_settlement(&query(), &policy, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RailError::Cancelled));
    assert_eq!(rail.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_spaces_attempts() {
    let rail = ScriptedRail::new(&["EM_PROCESSAMENTO", "EM_PROCESSAMENTO", "EM_PROCESSAMENTO", "PAGO"]);
    let policy = PollPolicy {
        interval: Duration::from_secs(1),
        max_attempts: 10,
        backoff: Backoff::Exponential {
            factor: 2,
            max: Duration::from_secs(3),
        },
    };
    let started = tokio::time::Instant::now();

    SettlementPoller::new(&rail)
        .await_settlement(&query(), &policy, &CancellationToken::new())
        .await
        .unwrap();

    // 1s + 2s + 3s (capped)
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(rail.polls(), 4);
}
