//! End-to-end turn-taking through the coordinator on a manual clock.

mod common;

use common::{Rig, chunk};
use parley::config::Config;
use parley::engine::{Control, EngineEvent};
use parley::session::{RemoteSession, SessionEvent};
use parley::turn::{Role, TranscriptEntry, TurnState};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Armed → Listening → Processing on one utterance.
fn user_turn(rig: &mut Rig) {
    rig.frames(40, true);
    assert_eq!(rig.coordinator.state(), TurnState::Listening);
    rig.frames(80, false);
    assert_eq!(rig.coordinator.state(), TurnState::Processing);
}

#[test]
fn full_conversation_turn() {
    let mut rig = Rig::armed();
    user_turn(&mut rig);
    let sent_during_turn = rig.session.sent_count();
    assert!(sent_during_turn >= 60, "sent {}", sent_during_turn);

    rig.remote(SessionEvent::PartialUserText("hello".to_string()));
    rig.remote(SessionEvent::PartialUserText(" there".to_string()));
    rig.remote(SessionEvent::PartialAssistantText("Hi there.".to_string()));
    rig.remote(SessionEvent::AudioChunk(chunk(24000)));
    assert_eq!(rig.coordinator.state(), TurnState::Speaking);

    rig.wait(ms(300));
    assert!(rig.coordinator.gain() < 0.15, "gain {}", rig.coordinator.gain());

    rig.remote(SessionEvent::TurnComplete);
    assert_eq!(
        rig.coordinator.transcript().entries(),
        &[
            TranscriptEntry {
                role: Role::User,
                text: "hello there".to_string()
            },
            TranscriptEntry {
                role: Role::Assistant,
                text: "Hi there.".to_string()
            },
        ]
    );
    assert_eq!(rig.coordinator.state(), TurnState::Speaking);

    rig.wait(ms(800));
    assert_eq!(rig.coordinator.state(), TurnState::Speaking);

    rig.wait(ms(600));
    assert_eq!(rig.coordinator.state(), TurnState::Armed);
    assert!(rig.coordinator.gain() > 0.9, "gain {}", rig.coordinator.gain());
    assert_eq!(rig.coordinator.shared().transcript().len(), 2);
}

#[test]
fn partials_carry_accumulated_text() {
    let mut rig = Rig::armed();
    user_turn(&mut rig);
    rig.drain_events();

    rig.remote(SessionEvent::PartialUserText("what".to_string()));
    rig.remote(SessionEvent::PartialUserText(" time".to_string()));

    let partials: Vec<String> = rig
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::LiveUserPartial(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(partials, vec!["what".to_string(), "what time".to_string()]);
}

#[test]
fn barge_in_transmits_then_interrupt_flushes() {
    let mut rig = Rig::armed();
    rig.remote(SessionEvent::PartialAssistantText("Let me".to_string()));
    rig.remote(SessionEvent::AudioChunk(chunk(48000)));
    assert_eq!(rig.coordinator.state(), TurnState::Speaking);
    rig.wait(ms(200));

    let before = rig.session.sent_count();
    rig.frames(20, true);
    assert!(rig.session.sent_count() - before >= 10);
    assert_eq!(rig.coordinator.state(), TurnState::Speaking);

    rig.drain_events();
    rig.remote(SessionEvent::Interrupted);
    assert_eq!(rig.coordinator.state(), TurnState::Armed);
    assert!(rig.output.chunks().iter().all(|c| c.stopped_at.is_some()));
    assert!(rig.output.playing().is_empty());
    assert!(!rig.coordinator.scheduler().is_busy());
    assert!(
        rig.drain_events()
            .contains(&EngineEvent::LiveAssistantPartial(String::new()))
    );

    rig.frames(30, true);
    assert_eq!(rig.coordinator.state(), TurnState::Listening);
}

#[test]
fn interrupt_with_two_chunks_queued() {
    let mut rig = Rig::armed();
    rig.remote(SessionEvent::PartialUserText("tell me a story".to_string()));
    rig.remote(SessionEvent::PartialAssistantText("Once upon".to_string()));
    rig.remote(SessionEvent::AudioChunk(chunk(12000)));
    rig.remote(SessionEvent::AudioChunk(chunk(12000)));
    rig.wait(ms(100));
    assert_eq!(rig.output.playing().len(), 1);

    rig.remote(SessionEvent::Interrupted);

    let scheduler = rig.coordinator.scheduler();
    assert_eq!(scheduler.next_free_slot(), scheduler.now());
    assert!(scheduler.live().is_empty());
    assert!(rig.output.chunks().iter().all(|c| c.stopped_at == Some(ms(100))));
    assert_eq!(rig.coordinator.state(), TurnState::Armed);
    assert!(rig.coordinator.transcript().is_empty());

    rig.remote(SessionEvent::AudioChunk(chunk(2400)));
    assert_eq!(rig.output.chunks()[2].start, ms(100));
}

#[test]
fn chunks_play_back_to_back() {
    let mut rig = Rig::armed();
    for _ in 0..3 {
        rig.remote(SessionEvent::AudioChunk(chunk(2400)));
    }
    let starts: Vec<Duration> = rig.output.chunks().iter().map(|c| c.start).collect();
    assert_eq!(starts, vec![ms(0), ms(100), ms(200)]);

    rig.wait(ms(50));
    rig.remote(SessionEvent::AudioChunk(chunk(2400)));
    assert_eq!(rig.output.chunks()[3].start, ms(300));

    rig.wait(ms(400));
    rig.remote(SessionEvent::AudioChunk(chunk(2400)));
    assert_eq!(rig.output.chunks()[4].start, ms(450));
}

#[test]
fn input_mute_blocks_transmission_and_turns() {
    let mut rig = Rig::armed();
    rig.coordinator
        .shared()
        .input_muted
        .store(true, Ordering::SeqCst);

    rig.frames(60, true);
    assert_eq!(rig.session.sent_count(), 0);
    assert_eq!(rig.coordinator.state(), TurnState::Armed);
}

#[test]
fn output_mute_keeps_timeline() {
    let mut rig = Rig::armed();
    rig.coordinator.handle_control(Control::MuteOutput(true));
    assert!(rig.output.is_muted());

    rig.remote(SessionEvent::AudioChunk(chunk(2400)));
    rig.remote(SessionEvent::AudioChunk(chunk(2400)));
    assert_eq!(rig.output.chunks()[1].start, ms(100));
}

#[test]
fn processing_timeout_is_recovered() {
    let mut rig = Rig::armed();
    user_turn(&mut rig);

    rig.wait(Duration::from_secs(14));
    assert_eq!(rig.coordinator.state(), TurnState::Processing);
    rig.wait(Duration::from_secs(2));
    assert_eq!(rig.coordinator.state(), TurnState::Armed);
    assert_eq!(rig.coordinator.recoveries(), 1);
}

#[test]
fn slow_open_handshake_is_not_recovered() {
    let mut rig = Rig::new();
    rig.frames(160, true);
    assert_eq!(rig.coordinator.state(), TurnState::Idle);
    assert_eq!(rig.session.sent_count(), 0);

    rig.remote(SessionEvent::Opened);
    rig.wait(ms(1000));
    assert_eq!(rig.coordinator.state(), TurnState::Armed);
    assert_eq!(rig.coordinator.recoveries(), 0);
    assert!(
        !rig.drain_events()
            .iter()
            .any(|e| matches!(e, EngineEvent::Fault(_)))
    );
}

#[test]
fn unconfirmed_session_is_abandoned() {
    let mut config = Config::default();
    config.session.open_timeout_ms = 2000;
    let mut rig = Rig::with_config(config);

    rig.wait(ms(1500));
    assert!(!rig.coordinator.is_stopped());

    rig.wait(ms(1000));
    assert!(rig.coordinator.is_stopped());
    assert!(rig.session.is_closed());
    assert!(rig.output.is_closed());
    assert_eq!(rig.coordinator.recoveries(), 0);
    let faults: Vec<EngineEvent> = rig
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::Fault(_)))
        .collect();
    assert_eq!(faults.len(), 1);
}

#[test]
fn remote_error_is_one_fault_and_releases_everything() {
    let mut rig = Rig::armed();
    rig.remote(SessionEvent::AudioChunk(chunk(24000)));
    rig.wait(ms(200));
    rig.drain_events();

    rig.remote(SessionEvent::Error("socket reset".to_string()));
    rig.remote(SessionEvent::Error("socket reset again".to_string()));
    rig.wait(ms(100));

    let faults: Vec<EngineEvent> = rig
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::Fault(_)))
        .collect();
    assert_eq!(faults.len(), 1);
    assert_eq!(rig.coordinator.state(), TurnState::Idle);
    assert!(rig.coordinator.is_stopped());
    assert!(rig.output.is_closed());
    assert!(rig.output.playing().is_empty());
    assert!(rig.session.is_closed());
    assert_eq!(rig.coordinator.gain(), 1.0);
}

#[test]
fn remote_close_ends_without_fault() {
    let mut rig = Rig::armed();
    rig.drain_events();
    rig.remote(SessionEvent::Closed);

    assert!(
        !rig.drain_events()
            .iter()
            .any(|e| matches!(e, EngineEvent::Fault(_)))
    );
    assert_eq!(rig.coordinator.state(), TurnState::Idle);
    assert!(rig.output.is_closed());
    assert!(rig.session.is_closed());
}
