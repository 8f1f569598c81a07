//! End-to-end dispatch tests against in-process relays and mock
//! payment/worker capabilities.

use async_trait::async_trait;
use dvm_engine::{
    CancellationToken, Engine, EngineConfig, Invoice, JobContext, JobSignal, PaymentBackend,
    Settlement, Worker,
};
use dvm_protocol::{unix_now, Event, HandlerProfile, JobRequest, JobUpdate, UnsignedEvent};
use dvm_relay::{MemoryConnector, MemoryRelay};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, Instant};

// ---- mock capabilities ----

static SIGN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn mock_sign(pubkey: &str, event: UnsignedEvent) -> Event {
    let n = SIGN_COUNTER.fetch_add(1, Ordering::SeqCst);
    Event {
        id: format!("signed-{n}"),
        pubkey: pubkey.to_string(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags,
        content: event.content,
        sig: "mock-sig".to_string(),
    }
}

struct MockPayment {
    paid: watch::Sender<bool>,
    outcome: Settlement,
    invoiced: Mutex<Vec<u64>>,
}

impl MockPayment {
    fn new(outcome: Settlement) -> Arc<Self> {
        let (paid, _) = watch::channel(false);
        Arc::new(Self {
            paid,
            outcome,
            invoiced: Mutex::new(Vec::new()),
        })
    }

    fn resolve(&self) {
        let _ = self.paid.send(true);
    }
}

#[async_trait]
impl PaymentBackend for MockPayment {
    async fn create_invoice(&self, amount_sats: u64, _memo: &str) -> anyhow::Result<Invoice> {
        self.invoiced.lock().await.push(amount_sats);
        Ok(Invoice {
            payment_request: format!("lnbc{amount_sats}sat"),
            payment_hash: format!("hash-{amount_sats}"),
            amount_sats,
        })
    }

    async fn await_settlement(&self, _payment_hash: &str) -> anyhow::Result<Settlement> {
        let mut rx = self.paid.subscribe();
        rx.wait_for(|paid| *paid).await?;
        Ok(self.outcome)
    }
}

// ---- mock workers ----

/// Publishes processing, then echoes input 0.
struct EchoWorker;

#[async_trait]
impl Worker for EchoWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5050]
    }

    fn public_key(&self) -> String {
        "echo-pk".to_string()
    }

    fn version(&self) -> String {
        "1.2.3".to_string()
    }

    fn profile(&self) -> HandlerProfile {
        HandlerProfile::new("echo", "Echoes text inputs")
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("echo-pk", event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        updates.send(JobUpdate::processing()).await?;
        match ctx.text_input(0).await {
            Ok(text) => updates.send(JobUpdate::success(format!("echo: {text}"))).await?,
            Err(e) => updates.send(JobUpdate::error(e.to_string())).await?,
        }
        Ok(())
    }
}

/// Echo worker with a configurable identity and kind.
struct NamedEchoWorker {
    pubkey: &'static str,
    kind: u16,
}

#[async_trait]
impl Worker for NamedEchoWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![self.kind]
    }

    fn public_key(&self) -> String {
        self.pubkey.to_string()
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign(self.pubkey, event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        match ctx.text_input(0).await {
            Ok(text) => updates.send(JobUpdate::success(format!("echo: {text}"))).await?,
            Err(e) => updates.send(JobUpdate::error(e.to_string())).await?,
        }
        Ok(())
    }
}

/// Requires payment up front, then completes.
struct PaywalledWorker;

#[async_trait]
impl Worker for PaywalledWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5100]
    }

    fn public_key(&self) -> String {
        "paywall-pk".to_string()
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("paywall-pk", event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        _ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        mut signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        updates.send(JobUpdate::payment_required(10)).await?;
        if let Some(JobSignal::PaymentCompleted) = signals.recv().await {
            updates.send(JobUpdate::success("unlocked")).await?;
        }
        Ok(())
    }
}

/// Finishes immediately and asks for payment on delivery.
struct PayOnDeliveryWorker;

#[async_trait]
impl Worker for PayOnDeliveryWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5200]
    }

    fn public_key(&self) -> String {
        "delivery-pk".to_string()
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("delivery-pk", event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        _ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        updates
            .send(JobUpdate::success_with_payment("deliverable", 5))
            .await?;
        Ok(())
    }
}

/// Fails without ever sending a terminal update.
struct FailingWorker;

#[async_trait]
impl Worker for FailingWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5050]
    }

    fn public_key(&self) -> String {
        "fail-pk".to_string()
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("fail-pk", event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        _ctx: JobContext,
        _updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("model exploded")
    }
}

/// Declines every job it is offered.
struct DecliningWorker;

#[async_trait]
impl Worker for DecliningWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5050]
    }

    fn public_key(&self) -> String {
        "decline-pk".to_string()
    }

    async fn accept(&self, _request: &JobRequest) -> bool {
        false
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("decline-pk", event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        _ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        updates.send(JobUpdate::error("declined job ran")).await?;
        Ok(())
    }
}

/// Sleeps before declining, standing in for an expensive acceptance check.
struct SlowAcceptWorker;

#[async_trait]
impl Worker for SlowAcceptWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5050]
    }

    fn public_key(&self) -> String {
        "slow-pk".to_string()
    }

    async fn accept(&self, _request: &JobRequest) -> bool {
        sleep(Duration::from_secs(1)).await;
        false
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("slow-pk", event))
    }

    async fn run(
        &self,
        _cancel: CancellationToken,
        _ctx: JobContext,
        _updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Starts processing and holds the session open until cancelled, flagging
/// that it observed the cancellation.
struct ParkedWorker {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Worker for ParkedWorker {
    fn kinds(&self) -> Vec<u16> {
        vec![5050]
    }

    fn public_key(&self) -> String {
        "parked-pk".to_string()
    }

    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<Event> {
        Ok(mock_sign("parked-pk", event))
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        _ctx: JobContext,
        updates: mpsc::Sender<JobUpdate>,
        _signals: mpsc::Receiver<JobSignal>,
    ) -> anyhow::Result<()> {
        updates.send(JobUpdate::processing()).await?;
        cancel.cancelled().await;
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---- harness ----

async fn start_engine(
    urls: &[&str],
    workers: Vec<Arc<dyn Worker>>,
    payments: Option<Arc<MockPayment>>,
    tweak: impl FnOnce(&mut EngineConfig),
) -> (Vec<Arc<MemoryRelay>>, Arc<Engine>) {
    let connector = MemoryConnector::new();
    let mut relays = Vec::new();
    for url in urls {
        relays.push(connector.register(*url).await);
    }

    let mut config = EngineConfig {
        relays: urls.iter().map(|s| s.to_string()).collect(),
        fetch_timeout: Duration::from_millis(300),
        advertise: false,
        ..EngineConfig::default()
    };
    tweak(&mut config);

    let mut engine = Engine::new(config, Arc::new(connector)).unwrap();
    for worker in workers {
        engine.register_worker(worker).unwrap();
    }
    let engine = match payments {
        Some(backend) => engine.with_payment_backend(backend),
        None => engine,
    };

    let engine = Arc::new(engine);
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let _ = engine.run().await;
        });
    }

    // Wait until the intake subscription is live on every relay.
    for relay in &relays {
        let deadline = Instant::now() + Duration::from_secs(2);
        while relay.active_subscription_count().await == 0 {
            assert!(Instant::now() < deadline, "engine did not subscribe");
            sleep(Duration::from_millis(5)).await;
        }
    }

    (relays, engine)
}

fn tag(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn job_request(id: &str, kind: u16, tags: Vec<Vec<String>>) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "customer-pk".to_string(),
        created_at: unix_now(),
        kind,
        tags,
        content: String::new(),
        sig: "sig".to_string(),
    }
}

fn status_of(event: &Event) -> Option<&str> {
    event
        .tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("status"))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

fn refs_job(event: &Event, job_id: &str) -> bool {
    event
        .tags
        .iter()
        .any(|t| t.first().map(String::as_str) == Some("e") && t.get(1).map(String::as_str) == Some(job_id))
}

async fn wait_for_event(relay: &MemoryRelay, pred: impl Fn(&Event) -> bool) -> Event {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(event) = relay.published().await.into_iter().find(|e| pred(e)) {
            return event;
        }
        assert!(Instant::now() < deadline, "expected event was not published");
        sleep(Duration::from_millis(10)).await;
    }
}

// ---- tests ----

#[tokio::test]
async fn test_text_job_runs_to_success() {
    let (relays, _engine) =
        start_engine(&["mem://a"], vec![Arc::new(EchoWorker)], None, |_| {}).await;

    relays[0]
        .inject(job_request("job1", 5050, vec![tag(&["i", "hi", "text"])]))
        .await;

    let feedback =
        wait_for_event(&relays[0], |e| e.kind == 7000 && refs_job(e, "job1")).await;
    assert_eq!(status_of(&feedback), Some("processing"));
    assert_eq!(feedback.pubkey, "echo-pk");

    let result = wait_for_event(&relays[0], |e| e.kind == 6050 && refs_job(e, "job1")).await;
    assert_eq!(result.content, "echo: hi");
    assert_eq!(result.pubkey, "echo-pk");
    assert!(result.tags.iter().any(|t| t[0] == "request"));
    assert!(result
        .tags
        .iter()
        .any(|t| t[0] == "p" && t[1] == "customer-pk"));
}

#[tokio::test]
async fn test_duplicate_request_across_relays_runs_once() {
    let (relays, _engine) = start_engine(
        &["mem://a", "mem://b"],
        vec![Arc::new(EchoWorker)],
        None,
        |_| {},
    )
    .await;

    let request = job_request("job1", 5050, vec![tag(&["i", "hi", "text"])]);
    relays[0].inject(request.clone()).await;
    relays[1].inject(request).await;

    wait_for_event(&relays[0], |e| e.kind == 6050).await;
    sleep(Duration::from_millis(100)).await;

    for relay in &relays {
        let results: Vec<Event> = relay
            .published()
            .await
            .into_iter()
            .filter(|e| e.kind == 6050)
            .collect();
        assert_eq!(results.len(), 1, "one session per request id");
    }
}

#[tokio::test]
async fn test_forward_referenced_input_resolves() {
    let (relays, _engine) =
        start_engine(&["mem://a"], vec![Arc::new(EchoWorker)], None, |_| {}).await;

    // The request references an event that has not been published yet.
    relays[0]
        .inject(job_request(
            "job1",
            5050,
            vec![tag(&["i", "source-ev", "event"])],
        ))
        .await;
    sleep(Duration::from_millis(50)).await;

    relays[0]
        .inject(Event {
            id: "source-ev".to_string(),
            pubkey: "author".to_string(),
            created_at: unix_now(),
            kind: 1,
            tags: vec![],
            content: "payload".to_string(),
            sig: "sig".to_string(),
        })
        .await;

    let result = wait_for_event(&relays[0], |e| e.kind == 6050).await;
    assert_eq!(result.content, "echo: payload");
}

#[tokio::test]
async fn test_unresolvable_input_reports_error() {
    let (relays, _engine) =
        start_engine(&["mem://a"], vec![Arc::new(EchoWorker)], None, |_| {}).await;

    relays[0]
        .inject(job_request(
            "job1",
            5050,
            vec![tag(&["i", "missing-ev", "event"])],
        ))
        .await;

    let feedback = wait_for_event(&relays[0], |e| {
        e.kind == 7000 && status_of(e) == Some("error")
    })
    .await;
    assert!(refs_job(&feedback, "job1"));
}

#[tokio::test]
async fn test_payment_flow_resumes_worker() {
    let payments = MockPayment::new(Settlement::Settled);
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(PaywalledWorker)],
        Some(Arc::clone(&payments)),
        |_| {},
    )
    .await;

    relays[0].inject(job_request("job1", 5100, vec![])).await;

    let feedback = wait_for_event(&relays[0], |e| {
        e.kind == 7000 && status_of(e) == Some("payment-required")
    })
    .await;
    // Amount in millisats, with the invoice attached.
    assert!(feedback
        .tags
        .contains(&tag(&["amount", "10000", "lnbc10sat"])));

    payments.resolve();

    let result = wait_for_event(&relays[0], |e| e.kind == 6100).await;
    assert_eq!(result.content, "unlocked");

    // The settlement notification stays internal.
    assert!(!relays[0]
        .published()
        .await
        .iter()
        .any(|e| status_of(e) == Some("payment-completed")));
}

#[tokio::test]
async fn test_unpaid_invoice_fails_job() {
    let payments = MockPayment::new(Settlement::Expired);
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(PaywalledWorker)],
        Some(Arc::clone(&payments)),
        |_| {},
    )
    .await;

    relays[0].inject(job_request("job1", 5100, vec![])).await;
    wait_for_event(&relays[0], |e| status_of(e) == Some("payment-required")).await;
    payments.resolve();

    let feedback =
        wait_for_event(&relays[0], |e| status_of(e) == Some("error")).await;
    assert!(feedback
        .tags
        .iter()
        .any(|t| t[0] == "status" && t.get(2).is_some_and(|m| m.contains("expired"))));
}

#[tokio::test]
async fn test_pay_on_delivery_result_carries_invoice() {
    let payments = MockPayment::new(Settlement::Settled);
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(PayOnDeliveryWorker)],
        Some(payments),
        |_| {},
    )
    .await;

    relays[0].inject(job_request("job1", 5200, vec![])).await;

    let result = wait_for_event(&relays[0], |e| e.kind == 6200).await;
    assert_eq!(result.content, "deliverable");
    assert!(result.tags.contains(&tag(&["amount", "5000", "lnbc5sat"])));

    let feedback = wait_for_event(&relays[0], |e| e.kind == 7000).await;
    assert_eq!(status_of(&feedback), Some("success"));
}

#[tokio::test]
async fn test_payment_required_without_backend_errors() {
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(PaywalledWorker)],
        None,
        |_| {},
    )
    .await;

    relays[0].inject(job_request("job1", 5100, vec![])).await;
    let feedback = wait_for_event(&relays[0], |e| status_of(e) == Some("error")).await;
    assert!(refs_job(&feedback, "job1"));
}

#[tokio::test]
async fn test_targeted_request_for_other_provider_ignored() {
    let (relays, _engine) =
        start_engine(&["mem://a"], vec![Arc::new(EchoWorker)], None, |_| {}).await;

    relays[0]
        .inject(job_request(
            "ignored",
            5050,
            vec![tag(&["i", "hi", "text"]), tag(&["p", "someone-else"])],
        ))
        .await;
    relays[0]
        .inject(job_request(
            "mine",
            5050,
            vec![tag(&["i", "hi", "text"]), tag(&["p", "echo-pk"])],
        ))
        .await;

    wait_for_event(&relays[0], |e| e.kind == 6050 && refs_job(e, "mine")).await;
    assert!(!relays[0]
        .published()
        .await
        .iter()
        .any(|e| refs_job(e, "ignored")));
}

#[tokio::test]
async fn test_targeted_request_reaches_only_named_worker() {
    // Two workers share the kind; the request names one of them.
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![
            Arc::new(NamedEchoWorker { pubkey: "alice-pk", kind: 5050 }),
            Arc::new(NamedEchoWorker { pubkey: "bob-pk", kind: 5050 }),
        ],
        None,
        |_| {},
    )
    .await;

    relays[0]
        .inject(job_request(
            "job1",
            5050,
            vec![tag(&["i", "hi", "text"]), tag(&["p", "bob-pk"])],
        ))
        .await;

    let result = wait_for_event(&relays[0], |e| e.kind == 6050).await;
    assert_eq!(result.pubkey, "bob-pk");

    sleep(Duration::from_millis(50)).await;
    assert!(!relays[0]
        .published()
        .await
        .iter()
        .any(|e| e.pubkey == "alice-pk"));
}

#[tokio::test]
async fn test_workers_publish_under_their_own_keys() {
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![
            Arc::new(NamedEchoWorker { pubkey: "alice-pk", kind: 5050 }),
            Arc::new(NamedEchoWorker { pubkey: "bob-pk", kind: 5050 }),
        ],
        None,
        |_| {},
    )
    .await;

    relays[0]
        .inject(job_request("job1", 5050, vec![tag(&["i", "hi", "text"])]))
        .await;

    wait_for_event(&relays[0], |e| e.kind == 6050 && e.pubkey == "alice-pk").await;
    wait_for_event(&relays[0], |e| e.kind == 6050 && e.pubkey == "bob-pk").await;
}

#[tokio::test]
async fn test_declined_job_is_skipped_silently() {
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(DecliningWorker), Arc::new(EchoWorker)],
        None,
        |_| {},
    )
    .await;

    relays[0]
        .inject(job_request("job1", 5050, vec![tag(&["i", "hi", "text"])]))
        .await;

    // The accepting worker still runs.
    let result = wait_for_event(&relays[0], |e| e.kind == 6050).await;
    assert_eq!(result.content, "echo: hi");

    // The declining worker produced nothing.
    sleep(Duration::from_millis(50)).await;
    assert!(!relays[0]
        .published()
        .await
        .iter()
        .any(|e| status_of(e) == Some("error")));
}

#[tokio::test]
async fn test_slow_acceptance_does_not_stall_other_jobs() {
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![
            Arc::new(SlowAcceptWorker),
            Arc::new(NamedEchoWorker { pubkey: "fast-pk", kind: 5100 }),
        ],
        None,
        |_| {},
    )
    .await;

    // A job stuck in the slow acceptance check must not delay the
    // unrelated job behind it in the intake stream.
    relays[0]
        .inject(job_request("stalled", 5050, vec![tag(&["i", "a", "text"])]))
        .await;
    relays[0]
        .inject(job_request("quick", 5100, vec![tag(&["i", "b", "text"])]))
        .await;

    let started = Instant::now();
    wait_for_event(&relays[0], |e| e.kind == 6100 && refs_job(e, "quick")).await;
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "unrelated job was held up by a slow acceptance check"
    );
}

#[tokio::test]
async fn test_worker_failure_reports_error_feedback() {
    let (relays, _engine) =
        start_engine(&["mem://a"], vec![Arc::new(FailingWorker)], None, |_| {}).await;

    relays[0]
        .inject(job_request("job1", 5050, vec![tag(&["i", "hi", "text"])]))
        .await;

    let feedback = wait_for_event(&relays[0], |e| status_of(e) == Some("error")).await;
    assert!(feedback
        .tags
        .iter()
        .any(|t| t[0] == "status" && t.get(2).is_some_and(|m| m.contains("model exploded"))));
}

#[tokio::test]
async fn test_session_capacity_refuses_excess_jobs() {
    let stopped = Arc::new(AtomicBool::new(false));
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(ParkedWorker {
            stopped: Arc::clone(&stopped),
        })],
        None,
        |config| config.max_sessions = 1,
    )
    .await;

    relays[0]
        .inject(job_request("job1", 5050, vec![tag(&["i", "a", "text"])]))
        .await;
    wait_for_event(&relays[0], |e| {
        refs_job(e, "job1") && status_of(e) == Some("processing")
    })
    .await;

    relays[0]
        .inject(job_request("job2", 5050, vec![tag(&["i", "b", "text"])]))
        .await;
    let refusal = wait_for_event(&relays[0], |e| {
        refs_job(e, "job2") && status_of(e) == Some("error")
    })
    .await;
    assert!(refusal
        .tags
        .iter()
        .any(|t| t[0] == "status" && t.get(2).is_some_and(|m| m.contains("too many"))));
}

#[tokio::test]
async fn test_advertisement_published_per_worker() {
    let (relays, _engine) = start_engine(
        &["mem://a"],
        vec![
            Arc::new(EchoWorker),
            Arc::new(NamedEchoWorker { pubkey: "bob-pk", kind: 5100 }),
        ],
        None,
        |config| config.advertise = true,
    )
    .await;

    let echo_handler =
        wait_for_event(&relays[0], |e| e.kind == 31990 && e.pubkey == "echo-pk").await;
    assert!(echo_handler.tags.contains(&tag(&["d", "1.2.3"])));
    assert!(echo_handler.tags.contains(&tag(&["k", "5050"])));
    let profile: serde_json::Value = serde_json::from_str(&echo_handler.content).unwrap();
    assert_eq!(profile["name"], "echo");

    let bob_handler =
        wait_for_event(&relays[0], |e| e.kind == 31990 && e.pubkey == "bob-pk").await;
    assert!(bob_handler.tags.contains(&tag(&["k", "5100"])));

    wait_for_event(&relays[0], |e| e.kind == 0 && e.pubkey == "echo-pk").await;
    wait_for_event(&relays[0], |e| e.kind == 0 && e.pubkey == "bob-pk").await;
}

#[tokio::test]
async fn test_shutdown_cancellation_reaches_worker() {
    let stopped = Arc::new(AtomicBool::new(false));
    let (relays, engine) = start_engine(
        &["mem://a"],
        vec![Arc::new(ParkedWorker {
            stopped: Arc::clone(&stopped),
        })],
        None,
        |_| {},
    )
    .await;

    relays[0]
        .inject(job_request("job1", 5050, vec![tag(&["i", "a", "text"])]))
        .await;
    wait_for_event(&relays[0], |e| status_of(e) == Some("processing")).await;

    engine.shutdown();

    let feedback = wait_for_event(&relays[0], |e| {
        refs_job(e, "job1") && status_of(e) == Some("error")
    })
    .await;
    assert!(feedback
        .tags
        .iter()
        .any(|t| t[0] == "status" && t.get(2).is_some_and(|m| m.contains("cancelled"))));

    // The worker saw the cancellation and returned on its own.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !stopped.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "worker never observed cancellation");
        sleep(Duration::from_millis(5)).await;
    }
}
