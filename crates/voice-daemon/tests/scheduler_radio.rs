mod common;

use common::*;
use std::sync::Arc;
use voice_daemon::session::GuildAudioSession;
use voice_proto::protocol::{
    ActionHint, ContentMode, EndReason, NodeEvent, NotificationKind, RadioStation, SessionState,
    Track,
};

fn station() -> RadioStation {
    RadioStation {
        name: "Jazz FM".to_string(),
        stream_url: "https://radio.example/jazz".to_string(),
    }
}

fn stream() -> Track {
    let mut t = Track::new("stream:jazz", "Jazz FM", ALICE);
    t.uri = Some(station().stream_url);
    t
}

async fn radio_session(node: &Arc<FakeNode>, sink: &Arc<RecordingSink>) -> Arc<GuildAudioSession> {
    let session = session(node, sink);
    session.lock().await.switch_to_radio(station());
    session
}

#[tokio::test]
async fn test_loads_only_first_stream() {
    let node = FakeNode::new();
    let sink = RecordingSink::new();
    let session = radio_session(&node, &sink).await;

    session.load_content(vec![stream(), track("extra")]).await;
    assert_eq!(node.started(), vec!["stream:jazz"]);

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.mode, ContentMode::Radio);
    assert_eq!(snapshot.radio_station.as_deref(), Some("Jazz FM"));
    assert!(snapshot.queue.is_empty());
}

#[tokio::test]
async fn test_start_announces_station_with_hints() {
    let node = FakeNode::new();
    let sink = RecordingSink::new();
    let session = radio_session(&node, &sink).await;

    session.load_content(vec![stream()]).await;
    session.handle_event(&started(&node.play("stream:jazz"))).await;

    let all = sink.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].kind, NotificationKind::RadioStarted);
    assert_eq!(all[0].args["station"], "Jazz FM");
    assert_eq!(all[0].actions, vec![ActionHint::StopRadio, ActionHint::RadioInfo]);
}

#[tokio::test]
async fn test_any_end_goes_idle() {
    for reason in [EndReason::Finished, EndReason::Stopped, EndReason::Cleanup] {
        let node = FakeNode::new();
        let sink = RecordingSink::new();
        let session = radio_session(&node, &sink).await;

        session.load_content(vec![stream()]).await;
        session
            .handle_event(&ended(&node.play("stream:jazz"), reason))
            .await;

        assert_eq!(node.started(), vec!["stream:jazz"], "{:?}", reason);
        let all = sink.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, NotificationKind::RadioStopped);
        assert_eq!(all[0].actions, vec![ActionHint::PlayRadio]);
        assert_eq!(session.state().await, SessionState::Leaving);
    }
}

#[tokio::test]
async fn test_stream_failure_tears_down() {
    let node = FakeNode::new();
    let sink = RecordingSink::new();
    let session = radio_session(&node, &sink).await;

    session.load_content(vec![stream()]).await;
    session
        .handle_event(&NodeEvent::TrackException {
            guild: GUILD,
            track: node.play("stream:jazz"),
            cause: None,
        })
        .await;
    settle().await;

    assert!(node.calls().contains(&NodeCall::Disconnect));
    let issue = sink.all().pop().unwrap();
    assert_eq!(issue.kind, NotificationKind::RadioIssue);
    assert_eq!(issue.args["station"], "Jazz FM");
    assert!(issue.correlation.is_some());
    assert_eq!(session.state().await, SessionState::Leaving);

    // A trailing end event for the broken stream changes nothing.
    session
        .handle_event(&ended(&node.play("stream:jazz"), EndReason::LoadFailed))
        .await;
    assert_eq!(sink.all().len(), 1);
}
