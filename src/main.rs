use anyhow::Result;
use chrono::Duration;
use murmur::fusion::{FusionConfig, FusionEngine, FusionOutcome};
use murmur::persist::{InMemoryBackend, PersistenceConfig, PersistenceQueue, QueueEvent};
use murmur::session::{SessionStore, Source, TranscriptFragment};
use murmur::stream::PipelineChannels;
use murmur::utils::{Clock, ManualClock};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting murmur transcript fusion demo");

    let clock = ManualClock::new(chrono::Utc::now());
    let store = SessionStore::new();
    let session = store.create_session("Demo conversation", clock.now());
    let mut engine = FusionEngine::new(
        FusionConfig::default(),
        Arc::new(clock.clone()),
        store.clone(),
        session.id.clone(),
    )?;

    // Scripted overlapping deltas, the way web-speech delivers them
    let script: [(&str, Source, i64); 6] = [
        ("Hello there", Source::Microphone, 0),
        ("Hello there, how", Source::Microphone, 400),
        ("Hello there, how are you doing today?", Source::Microphone, 300),
        ("I'm doing well", Source::Loopback, 200),
        ("I'm doing well, thanks for", Source::Loopback, 500),
        ("thanks for asking about it", Source::Loopback, 400),
    ];

    // capture side: fragments go onto the typed bus as they arrive
    let channels = PipelineChannels::new();
    for (text, source, delay_ms) in script {
        clock.advance(Duration::milliseconds(delay_ms));
        channels
            .fragments
            .fragment_tx
            .send(TranscriptFragment::new(text, source, clock.now()))?;
    }

    // fusion side: drain the bus through the engine
    while let Ok(fragment) = channels.fragments.fragment_rx.try_recv() {
        for outcome in engine.ingest(&fragment)? {
            channels.outcomes.outcome_tx.send(outcome)?;
        }
    }

    // silence long enough to flush both buffers
    clock.advance(Duration::seconds(3));
    for outcome in engine.tick()? {
        channels.outcomes.outcome_tx.send(outcome)?;
    }
    while let Ok(outcome) = channels.outcomes.outcome_rx.try_recv() {
        report(&outcome);
    }

    let messages = store
        .session(&session.id)
        .map(|s| s.messages)
        .unwrap_or_default();
    info!("fused {} fragment(s) into {} message(s)", script.len(), messages.len());

    // persist through the queue against the in-memory backend
    let backend = Arc::new(InMemoryBackend::new());
    backend.register_session(&session);
    let queue = PersistenceQueue::new(
        PersistenceConfig::default().with_debounce(Duration::milliseconds(50)),
    )?;
    let handle = queue.handle();
    let worker = queue.start_worker(store.clone(), backend.clone(), None)?;

    for message in &messages {
        handle.queue_message(&session.id, message)?;
    }
    handle.flush_now()?;

    let mut saved = 0;
    while saved < messages.len() {
        match handle.recv_event_timeout(std::time::Duration::from_secs(2)) {
            Some(QueueEvent::Saved { message_id, .. }) => {
                info!("saved message {}", message_id);
                saved += 1;
            }
            Some(_) => {}
            None => break,
        }
    }

    handle.shutdown()?;
    let _ = worker.join();

    for message in backend.saved_messages(&session.id) {
        info!(
            "[{:?}/{:?}] {:.2} {}",
            message.source, message.kind, message.confidence, message.content
        );
    }
    info!("demo finished: {}/{} messages durable", saved, messages.len());

    Ok(())
}

fn report(outcome: &FusionOutcome) {
    match outcome {
        FusionOutcome::Created { message, .. } => {
            info!("new message: {:?}", message.content)
        }
        FusionOutcome::Updated { message, .. } => {
            info!("grew message: {:?}", message.content)
        }
        FusionOutcome::Discarded { source, reason } => {
            info!("discarded flush from {:?}: {:?}", source, reason)
        }
    }
}
