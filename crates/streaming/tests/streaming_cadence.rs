//! End-to-end cadence tests for the streaming controller: threshold flushes,
//! silence boundaries, disconnect teardown and cross-session isolation, all
//! against a recording mock backend.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use streamspeech_streaming::{
    AsrBackend, AudioChunk, ERROR_SENTINEL, InferenceRequest, SessionConfig, SessionError,
    SessionEvent, SessionId, SessionRegistry, StreamingController,
};

/// Backend that records every request it sees and can be flipped into a
/// failing mode.
struct RecordingBackend {
    calls: Mutex<Vec<InferenceRequest>>,
    fail: AtomicBool,
}

impl RecordingBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(|r| r.audio.len()).collect()
    }
}

#[async_trait]
impl AsrBackend for RecordingBackend {
    async fn transcribe(&self, request: InferenceRequest) -> anyhow::Result<String> {
        let text = format!("utterance of {} bytes", request.audio.len());
        self.calls.lock().unwrap().push(request);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("backend unavailable");
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// 16000 Hz, 2 bytes/sample, 1000 ms response frequency → 32000-byte flush
/// threshold.
fn test_config() -> SessionConfig {
    SessionConfig::new("hi".to_string(), 16000, Vec::new(), 1000, 2)
}

fn setup() -> (StreamingController, Arc<RecordingBackend>, SessionId) {
    let backend = RecordingBackend::new();
    let registry = Arc::new(SessionRegistry::new());
    let controller = StreamingController::new(registry, backend.clone() as Arc<dyn AsrBackend>);
    let id = SessionId::new();
    controller.registry().create(id, test_config()).unwrap();
    controller.start_stream(id).unwrap();
    (controller, backend, id)
}

fn speaking(bytes: usize) -> AudioChunk {
    AudioChunk {
        audio: vec![0u8; bytes],
        language_hint: None,
        is_speaking: true,
        disconnect: false,
    }
}

fn silence() -> AudioChunk {
    AudioChunk {
        audio: Vec::new(),
        language_hint: None,
        is_speaking: false,
        disconnect: false,
    }
}

#[tokio::test]
async fn threshold_cadence_concrete_scenario() {
    let (controller, backend, id) = setup();
    assert_eq!(test_config().flush_threshold_bytes, 32000);

    // 20000 < 32000: no flush yet.
    let events = controller.process_chunk(id, speaking(20000)).await.unwrap();
    assert!(events.is_empty());

    // Cumulative 35000 >= 32000: exactly one flush over the full utterance.
    let events = controller.process_chunk(id, speaking(15000)).await.unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::Transcript {
            text: "utterance of 35000 bytes".to_string(),
            language: "hi".to_string(),
        }]
    );

    // Only 3000 new bytes since the high-water mark: no flush.
    let events = controller.process_chunk(id, speaking(3000)).await.unwrap();
    assert!(events.is_empty());

    assert_eq!(backend.call_sizes(), vec![35000]);
}

#[tokio::test]
async fn high_water_mark_strictly_increases_across_flushes() {
    let (controller, backend, id) = setup();

    for _ in 0..3 {
        controller.process_chunk(id, speaking(32000)).await.unwrap();
    }

    // Each flush covers the whole utterance so far, so sizes grow strictly.
    assert_eq!(backend.call_sizes(), vec![32000, 64000, 96000]);
}

#[tokio::test]
async fn silence_forces_flush_and_resets_buffer() {
    let (controller, backend, id) = setup();

    // Well below the threshold, but silence flushes anyway.
    controller.process_chunk(id, speaking(5000)).await.unwrap();
    let events = controller.process_chunk(id, silence()).await.unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::Transcript {
            text: "utterance of 5000 bytes".to_string(),
            language: "hi".to_string(),
        }]
    );
    assert_eq!(backend.call_sizes(), vec![5000]);

    controller
        .registry()
        .with_session(id, |state| {
            assert!(state.audio_buffer.is_empty());
            assert_eq!(state.bytes_since_last_flush, 0);
        })
        .unwrap();

    // Silence over an already-empty buffer is a no-op, not an error.
    let events = controller.process_chunk(id, silence()).await.unwrap();
    assert!(events.is_empty());
    assert_eq!(backend.call_sizes(), vec![5000]);
}

#[tokio::test]
async fn threshold_flush_keeps_buffer_silence_flush_covers_whole_utterance() {
    let (controller, backend, id) = setup();

    controller.process_chunk(id, speaking(32000)).await.unwrap();
    controller
        .registry()
        .with_session(id, |state| {
            // The utterance keeps growing after a mid-utterance flush.
            assert_eq!(state.audio_buffer.len(), 32000);
            assert_eq!(state.bytes_since_last_flush, 32000);
        })
        .unwrap();

    let mut boundary = silence();
    boundary.audio = vec![0u8; 1000];
    controller.process_chunk(id, boundary).await.unwrap();

    // The boundary flush re-covers the full 33000-byte utterance.
    assert_eq!(backend.call_sizes(), vec![32000, 33000]);
}

#[tokio::test]
async fn disconnect_flushes_once_more_then_terminates() {
    let (controller, backend, id) = setup();

    controller.process_chunk(id, speaking(5000)).await.unwrap();
    let events = controller
        .process_chunk(
            id,
            AudioChunk {
                audio: vec![0u8; 1000],
                language_hint: None,
                is_speaking: true,
                disconnect: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        events,
        vec![
            SessionEvent::Transcript {
                text: "utterance of 6000 bytes".to_string(),
                language: "hi".to_string(),
            },
            SessionEvent::Terminated,
        ]
    );
    assert_eq!(backend.call_sizes(), vec![6000]);
    assert!(controller.registry().is_empty());

    // Replaying the disconnect for the now-closed session is rejected, not
    // flushed again.
    let err = controller
        .process_chunk(
            id,
            AudioChunk {
                audio: Vec::new(),
                language_hint: None,
                is_speaking: true,
                disconnect: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
    assert_eq!(backend.call_sizes(), vec![6000]);
}

#[tokio::test]
async fn disconnect_on_threshold_event_flushes_twice() {
    let (controller, backend, id) = setup();

    // One event both crosses the threshold and requests disconnect: the
    // cadence flush runs, then the terminal flush re-covers the buffer.
    let events = controller
        .process_chunk(
            id,
            AudioChunk {
                audio: vec![0u8; 32000],
                language_hint: None,
                is_speaking: true,
                disconnect: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 3);
    assert_eq!(events[2], SessionEvent::Terminated);
    assert_eq!(backend.call_sizes(), vec![32000, 32000]);
}

#[tokio::test]
async fn silence_with_disconnect_flushes_only_once() {
    let (controller, backend, id) = setup();

    // The boundary flush clears the buffer, so the terminal flush has
    // nothing left to cover.
    let events = controller
        .process_chunk(
            id,
            AudioChunk {
                audio: vec![0u8; 4000],
                language_hint: None,
                is_speaking: false,
                disconnect: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[1], SessionEvent::Terminated);
    assert_eq!(backend.call_sizes(), vec![4000]);
    assert!(controller.registry().is_empty());
}

#[tokio::test]
async fn empty_buffer_disconnect_as_first_event() {
    let (controller, backend, id) = setup();

    let events = controller
        .process_chunk(
            id,
            AudioChunk {
                audio: Vec::new(),
                language_hint: None,
                is_speaking: true,
                disconnect: true,
            },
        )
        .await
        .unwrap();

    // Zero flushes, one termination, session removed.
    assert_eq!(events, vec![SessionEvent::Terminated]);
    assert!(backend.call_sizes().is_empty());
    assert!(controller.registry().is_empty());
}

#[tokio::test]
async fn transport_close_converges_on_final_flush_and_teardown() {
    let (controller, backend, id) = setup();

    controller.process_chunk(id, speaking(7000)).await.unwrap();
    let events = controller.close(id).await;

    assert_eq!(
        events,
        vec![
            SessionEvent::Transcript {
                text: "utterance of 7000 bytes".to_string(),
                language: "hi".to_string(),
            },
            SessionEvent::Terminated,
        ]
    );
    assert_eq!(backend.call_sizes(), vec![7000]);

    // Closing again (the racing teardown path) yields nothing.
    assert!(controller.close(id).await.is_empty());
    assert_eq!(backend.call_sizes(), vec![7000]);
}

#[tokio::test]
async fn start_stream_resets_segment_on_same_session() {
    let (controller, backend, id) = setup();

    controller.process_chunk(id, speaking(20000)).await.unwrap();
    controller.start_stream(id).unwrap();

    // The 20000 pre-restart bytes are gone; a fresh sub-threshold chunk
    // does not flush.
    let events = controller.process_chunk(id, speaking(20000)).await.unwrap();
    assert!(events.is_empty());

    // And the next boundary covers only the new segment.
    controller.process_chunk(id, silence()).await.unwrap();
    assert_eq!(backend.call_sizes(), vec![20000]);
}

#[tokio::test]
async fn inference_failure_degrades_to_sentinel() {
    let (controller, backend, id) = setup();
    backend.fail.store(true, Ordering::SeqCst);

    controller.process_chunk(id, speaking(1000)).await.unwrap();
    let events = controller.process_chunk(id, silence()).await.unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::Transcript {
            text: ERROR_SENTINEL.to_string(),
            language: "hi".to_string(),
        }]
    );

    // The session survives the failure and keeps processing.
    backend.fail.store(false, Ordering::SeqCst);
    controller.process_chunk(id, speaking(32000)).await.unwrap();
    assert_eq!(backend.call_sizes(), vec![1000, 32000]);
}

#[tokio::test]
async fn concurrent_sessions_never_observe_each_other() {
    let backend = RecordingBackend::new();
    let registry = Arc::new(SessionRegistry::new());
    let controller = Arc::new(StreamingController::new(
        registry,
        backend.clone() as Arc<dyn AsrBackend>,
    ));

    let a = SessionId::new();
    let b = SessionId::new();
    controller.registry().create(a, test_config()).unwrap();
    controller.registry().create(b, test_config()).unwrap();
    controller.start_stream(a).unwrap();
    controller.start_stream(b).unwrap();

    // Interleaved arrival from two independent connection tasks.
    let ctl_a = controller.clone();
    let task_a = tokio::spawn(async move {
        for _ in 0..10 {
            ctl_a.process_chunk(a, speaking(4000)).await.unwrap();
        }
        ctl_a.process_chunk(a, silence()).await.unwrap()
    });
    let ctl_b = controller.clone();
    let task_b = tokio::spawn(async move {
        for _ in 0..10 {
            ctl_b.process_chunk(b, speaking(3000)).await.unwrap();
        }
        ctl_b.process_chunk(b, silence()).await.unwrap()
    });

    let (events_a, events_b) = (task_a.await.unwrap(), task_b.await.unwrap());

    // Each boundary flush covers exactly its own session's bytes: any
    // cross-session leakage would change these totals.
    assert_eq!(
        events_a,
        vec![SessionEvent::Transcript {
            text: "utterance of 40000 bytes".to_string(),
            language: "hi".to_string(),
        }]
    );
    assert_eq!(
        events_b,
        vec![SessionEvent::Transcript {
            text: "utterance of 30000 bytes".to_string(),
            language: "hi".to_string(),
        }]
    );

    // 40000 crossed the 32000 threshold once for A; B stayed below it.
    let mut sizes = backend.call_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![30000, 32000, 40000]);
}
