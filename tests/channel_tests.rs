//! Channel state tracking and call-control tests


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use freeswitch_eventsocket::{
    Channel, EventMessage, EventSocket, HangupCause, Leg, PlayGetDigitsOptions, ReadOptions,
};
use indexmap::IndexMap;
use mock_server::{setup_connected_pair, MockClient};

fn initial_event(uuid: &str, answer_state: &str, extra: &[(&str, &str)]) -> EventMessage {
    let mut headers = IndexMap::new();
    headers.insert("Event-Name".to_string(), "CHANNEL_DATA".to_string());
    headers.insert("Unique-ID".to_string(), uuid.to_string());
    headers.insert("Answer-State".to_string(), answer_state.to_string());
    headers.insert("Channel-State".to_string(), "CS_EXECUTE".to_string());
    for (k, v) in extra {
        headers.insert(k.to_string(), v.to_string());
    }
    EventMessage::from_headers(headers)
}

async fn answered_channel(socket: &EventSocket, uuid: &str) -> Channel {
    Channel::new(socket.clone(), initial_event(uuid, "answered", &[])).unwrap()
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn last_event_follows_the_stream() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = Channel::new(socket.clone(), initial_event("u-1", "ringing", &[])).unwrap();
    assert!(!channel.is_answered());

    mock.send_event_plain(
        "CHANNEL_ANSWER",
        &[("Unique-ID", "u-1"), ("Answer-State", "answered")],
    )
    .await;

    wait_for(|| channel.is_answered()).await;

    // events for other calls must not touch this channel
    mock.send_event_plain(
        "CHANNEL_HANGUP",
        &[("Unique-ID", "other-uuid"), ("Answer-State", "hangup")],
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(channel.is_answered());
    assert!(!channel.is_disposed());
}

#[tokio::test]
async fn hangup_callback_fires_exactly_once() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-2").await;

    let fired = Arc::new(AtomicUsize::new(0));
    channel.on_hangup({
        let fired = Arc::clone(&fired);
        move |event| {
            assert_eq!(event.uuid(), Some("u-2"));
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });

    // duplicate hangup events for the same call
    for _ in 0..2 {
        mock.send_event_plain(
            "CHANNEL_HANGUP",
            &[
                ("Unique-ID", "u-2"),
                ("Answer-State", "hangup"),
                ("Hangup-Cause", "NORMAL_CLEARING"),
            ],
        )
        .await;
    }

    wait_for(|| channel.is_disposed()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let (_mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-3").await;

    channel.dispose();
    channel.dispose();
    assert!(channel.is_disposed());
}

#[tokio::test]
async fn bridged_state_comes_from_other_leg_header() {
    let (_mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = Channel::new(
        socket.clone(),
        initial_event("u-4", "answered", &[("Other-Leg-Unique-ID", "peer-1")]),
    )
    .unwrap();

    assert!(channel.is_bridged());
    assert_eq!(channel.other_leg_uuid().as_deref(), Some("peer-1"));
}

#[tokio::test]
async fn hangup_sends_uuid_kill_when_answered() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-5").await;

    let hangup = tokio::spawn({
        let channel = channel.clone();
        async move { channel.hangup(HangupCause::NormalClearing).await }
    });

    let cmd = mock.read_command().await;
    assert_eq!(cmd, "api uuid_kill u-5 NORMAL_CLEARING\n\n");
    mock.reply_api("+OK\n").await;

    hangup.await.unwrap().unwrap();
}

#[tokio::test]
async fn hangup_is_a_noop_before_answer() {
    let (_mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = Channel::new(socket.clone(), initial_event("u-6", "ringing", &[])).unwrap();

    // resolves immediately, nothing hits the wire
    channel.hangup(HangupCause::NormalClearing).await.unwrap();
}

#[tokio::test]
async fn play_file_is_a_noop_before_answer() {
    let (_mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = Channel::new(socket.clone(), initial_event("u-7", "ringing", &[])).unwrap();

    channel
        .play_file("/sounds/prompt.wav", Leg::ALeg, false, None)
        .await
        .unwrap();
}

async fn complete_execute(mock: &mut MockClient, uuid: &str, app: &str, vars: &[(&str, &str)]) {
    let cmd = mock.read_command().await;
    assert!(cmd.starts_with(&format!("sendmsg {}\n", uuid)), "got {cmd:?}");
    assert!(cmd.contains(&format!("execute-app-name: {}\n", app)));
    let event_uuid = cmd
        .lines()
        .find_map(|line| line.strip_prefix("Event-UUID: "))
        .unwrap()
        .to_string();
    mock.reply_ok().await;

    let mut headers: Vec<(&str, String)> = vec![
        ("Unique-ID", uuid.to_string()),
        ("Application", app.to_string()),
        ("Application-UUID", event_uuid),
    ];
    for &(k, v) in vars {
        headers.push((k, v.to_string()));
    }
    let headers: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
    mock.send_event_plain("CHANNEL_EXECUTE_COMPLETE", &headers).await;
}

#[tokio::test]
async fn play_file_runs_playback_on_a_leg() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-8").await;

    let play = tokio::spawn({
        let channel = channel.clone();
        async move {
            channel
                .play_file("/sounds/prompt.wav", Leg::ALeg, false, None)
                .await
        }
    });

    complete_execute(&mut mock, "u-8", "playback", &[]).await;
    play.await.unwrap().unwrap();
}

#[tokio::test]
async fn play_file_with_terminator_sets_variable_first() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-9").await;

    let play = tokio::spawn({
        let channel = channel.clone();
        async move {
            channel
                .play_file("/sounds/prompt.wav", Leg::BLeg, true, Some("#"))
                .await
        }
    });

    let cmd = mock.read_command().await;
    assert_eq!(cmd, "api uuid_setvar u-9 playback_terminators #\n\n");
    mock.reply_api("+OK\n").await;

    // B-leg playback displaces the session toward the peer, mixed
    let cmd = mock.read_command().await;
    assert!(cmd.contains("execute-app-name: displace_session\n"));
    assert!(cmd.contains("execute-app-arg: /sounds/prompt.wav mr\n"));
    let event_uuid = cmd
        .lines()
        .find_map(|line| line.strip_prefix("Event-UUID: "))
        .unwrap()
        .to_string();
    mock.reply_ok().await;
    mock.send_event_plain(
        "CHANNEL_EXECUTE_COMPLETE",
        &[
            ("Unique-ID", "u-9"),
            ("Application", "displace_session"),
            ("Application-UUID", event_uuid.as_str()),
        ],
    )
    .await;

    play.await.unwrap().unwrap();
}

#[tokio::test]
async fn play_get_digits_returns_collected_digits() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-10").await;

    let collect = tokio::spawn({
        let channel = channel.clone();
        async move {
            channel
                .play_get_digits(PlayGetDigitsOptions {
                    file: "/sounds/enter-pin.wav".to_string(),
                    ..Default::default()
                })
                .await
        }
    });

    complete_execute(
        &mut mock,
        "u-10",
        "play_and_get_digits",
        &[("variable_read_digits", "4242")],
    )
    .await;

    assert_eq!(collect.await.unwrap().unwrap().as_deref(), Some("4242"));
}

#[tokio::test]
async fn read_returns_digits_and_terminator() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-11").await;

    let read = tokio::spawn({
        let channel = channel.clone();
        async move { channel.read(ReadOptions::default()).await }
    });

    complete_execute(
        &mut mock,
        "u-11",
        "read",
        &[
            ("variable_read_digits", "123"),
            ("variable_read_terminator_used", "#"),
        ],
    )
    .await;

    let result = read.await.unwrap().unwrap();
    assert_eq!(result.digits, "123");
    assert_eq!(result.terminator.as_deref(), Some("#"));
}

#[tokio::test]
async fn read_is_empty_before_answer() {
    let (_mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = Channel::new(socket.clone(), initial_event("u-12", "ringing", &[])).unwrap();

    let result = channel.read(ReadOptions::default()).await.unwrap();
    assert!(result.digits.is_empty());
    assert!(result.terminator.is_none());
}

#[tokio::test]
async fn send_dtmf_uses_duration_argument() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-13").await;

    let send = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send_dtmf("1234#", None).await }
    });

    let cmd = mock.read_command().await;
    assert!(cmd.contains("execute-app-name: send_dtmf\n"));
    assert!(cmd.contains("execute-app-arg: 1234#@2000\n"));
    let event_uuid = cmd
        .lines()
        .find_map(|line| line.strip_prefix("Event-UUID: "))
        .unwrap()
        .to_string();
    mock.reply_ok().await;
    mock.send_event_plain(
        "CHANNEL_EXECUTE_COMPLETE",
        &[
            ("Unique-ID", "u-13"),
            ("Application", "send_dtmf"),
            ("Application-UUID", event_uuid.as_str()),
        ],
    )
    .await;

    send.await.unwrap().unwrap();
}

#[tokio::test]
async fn bridge_issues_uuid_bridge() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-16").await;

    let bridge = tokio::spawn({
        let channel = channel.clone();
        async move { channel.bridge("peer-uuid").await }
    });

    let cmd = mock.read_command().await;
    assert_eq!(cmd, "api uuid_bridge u-16 peer-uuid\n\n");
    mock.reply_api("+OK\n").await;

    bridge.await.unwrap().unwrap();
}

#[tokio::test]
async fn get_channel_variable_reads_bare_value() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-17").await;

    let get = tokio::spawn({
        let channel = channel.clone();
        async move { channel.get_channel_variable("sip_call_id").await }
    });
    let cmd = mock.read_command().await;
    assert_eq!(cmd, "api uuid_getvar u-17 sip_call_id\n\n");
    mock.reply_api("abc123@host").await;
    assert_eq!(get.await.unwrap().unwrap().as_deref(), Some("abc123@host"));

    let unset = tokio::spawn({
        let channel = channel.clone();
        async move { channel.get_channel_variable("missing_var").await }
    });
    let _ = mock.read_command().await;
    mock.reply_api("_undef_").await;
    assert_eq!(unset.await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn dtmf_stream_yields_this_channels_digits() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-14").await;
    let mut dtmf = channel.dtmf();

    mock.send_event_plain("DTMF", &[("Unique-ID", "someone-else"), ("DTMF-Digit", "9")])
        .await;
    mock.send_event_plain("DTMF", &[("Unique-ID", "u-14"), ("DTMF-Digit", "1")])
        .await;
    mock.send_event_plain("DTMF", &[("Unique-ID", "u-14"), ("DTMF-Digit", "#")])
        .await;

    let first = tokio::time::timeout(Duration::from_secs(5), dtmf.next())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(first.as_deref(), Some("1"));

    let second = tokio::time::timeout(Duration::from_secs(5), dtmf.next())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(second.as_deref(), Some("#"));
}

#[tokio::test]
async fn feature_codes_pair_prefixed_digits() {
    let (mut mock, socket) = setup_connected_pair("ClueCon").await;
    let channel = answered_channel(&socket, "u-15").await;
    let mut codes = channel.feature_codes(None);

    // plain digits are not feature codes
    mock.send_event_plain("DTMF", &[("Unique-ID", "u-15"), ("DTMF-Digit", "5")])
        .await;
    mock.send_event_plain("DTMF", &[("Unique-ID", "u-15"), ("DTMF-Digit", "#")])
        .await;
    mock.send_event_plain("DTMF", &[("Unique-ID", "u-15"), ("DTMF-Digit", "7")])
        .await;

    let code = tokio::time::timeout(Duration::from_secs(5), codes.next())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(code.as_deref(), Some("#7"));
}
