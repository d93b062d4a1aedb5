//! Tests for AtChannel
//!
//! These tests verify:
//! - Command/response correlation for every classification mode
//! - Post-condition downgrade for single-line and numeric commands
//! - Prompt-driven payload upload
//! - Timeouts, stop/close unblocking waiting callers
//! - Serialization of concurrent callers
//! - Lifecycle misuse and ad hoc reads

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use atchannel::protocol::{CLOSED_FINAL_LINE, TIMEOUT_FINAL_LINE};
use atchannel::transport::{LoopbackHandle, LoopbackPort};
use atchannel::{
    AtChannel, AtError, ChannelConfig, ChannelState, Classification, Command, ErrorCategory,
    Status, UnsolicitedEvent,
};

// =============================================================================
// Helper Functions
// =============================================================================

const WAIT: Duration = Duration::from_secs(2);

fn open_channel() -> (AtChannel, LoopbackHandle) {
    let (reader, writer, device) = LoopbackPort::new(Duration::from_millis(5));
    let config = ChannelConfig::builder().default_timeout_ms(2000).build();
    let channel = AtChannel::open(reader, writer, config).unwrap();
    (channel, device)
}

fn setup_channel() -> (AtChannel, LoopbackHandle) {
    let (channel, device) = open_channel();
    channel.start().unwrap();
    (channel, device)
}

/// Device thread: wait for `expect` to be written, then answer with `lines`
fn respond(device: &LoopbackHandle, expect: &str, lines: &[&str]) -> JoinHandle<()> {
    let device = device.clone();
    let expect = expect.to_string();
    let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();

    thread::spawn(move || {
        assert!(
            device.wait_for_written(expect.as_bytes(), WAIT),
            "device never saw {:?}",
            expect
        );
        for line in lines {
            device.feed_line(&line);
        }
    })
}

fn command(text: &str, classification: Classification) -> Command {
    Command::new(text, classification, WAIT)
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_no_result_command_ok() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT\r", &["OK"]);

    let response = channel.send(command("AT", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert!(response.lines().is_empty());
    assert_eq!(response.final_line(), "OK");
    assert_eq!(device.written(), b"AT\r".to_vec());
}

#[test]
fn test_single_line_command() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CSQ\r", &["+CSQ: 10,99", "OK"]);

    let response = channel.send_expect_single_line("AT+CSQ", "+CSQ:").unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(response.lines(), &["+CSQ: 10,99".to_string()]);
    assert_eq!(response.first_line(), Some("+CSQ: 10,99"));
}

#[test]
fn test_single_line_without_intermediate_is_downgraded() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CSQ\r", &["OK"]);

    let response = channel.send_expect_single_line("AT+CSQ", "+CSQ:").unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
    assert!(!response.is_success());
    assert_eq!(response.final_line(), "OK");
}

#[test]
fn test_single_line_via_generic_send_is_downgraded() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CGMR\r", &["OK"]);

    let cmd = command("AT+CGMR", Classification::SingleLine).with_prefix("+CGMR:");
    let response = channel.send(cmd).unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
}

#[test]
fn test_single_line_accepts_only_first_match() {
    let (channel, device) = setup_channel();
    let events = channel.subscribe();
    let device_thread = respond(&device, "AT+CREG?\r", &["+CREG: 0,1", "+CREG: 0,5", "OK"]);

    let response = channel.send_expect_single_line("AT+CREG?", "+CREG:").unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(response.lines(), &["+CREG: 0,1".to_string()]);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        UnsolicitedEvent::Line("+CREG: 0,5".to_string())
    );
}

#[test]
fn test_numeric_command() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CGSN\r", &["861234567890123", "OK"]);

    let response = channel.send_expect_numeric("AT+CGSN").unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(response.first_line(), Some("861234567890123"));
}

#[test]
fn test_numeric_rejects_non_digit_and_downgrades() {
    let (channel, device) = setup_channel();
    let events = channel.subscribe();
    let device_thread = respond(&device, "AT+CGSN\r", &["AT+CGSN", "OK"]);

    let response = channel.send_expect_numeric("AT+CGSN").unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        UnsolicitedEvent::Line("AT+CGSN".to_string())
    );
}

#[test]
fn test_multi_line_with_prefix() {
    let (channel, device) = setup_channel();
    let events = channel.subscribe();
    let device_thread = respond(
        &device,
        "AT+CMGL=4\r",
        &["+CMGL: 1,1,,23", "07911326040000F0", "+CMGL: 2,1,,23", "OK"],
    );

    let response = channel
        .send_expect_multi_line("AT+CMGL=4", Some("+CMGL:"))
        .unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(
        response.lines(),
        &["+CMGL: 1,1,,23".to_string(), "+CMGL: 2,1,,23".to_string()]
    );
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        UnsolicitedEvent::Line("07911326040000F0".to_string())
    );
}

#[test]
fn test_multi_line_no_prefix_keeps_every_line_in_order() {
    let (channel, device) = setup_channel();
    let device_thread = respond(
        &device,
        "ATI\r",
        &["Quectel", "EC25", "Revision: EC25EFAR06A06M4G", "+CSQ: not filtered", "OK"],
    );

    let response = channel.send_expect_multi_line("ATI", None).unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(
        response.lines(),
        &[
            "Quectel".to_string(),
            "EC25".to_string(),
            "Revision: EC25EFAR06A06M4G".to_string(),
            "+CSQ: not filtered".to_string(),
        ]
    );
}

#[test]
fn test_multi_line_with_zero_lines_succeeds() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CMGL=4\r", &["OK"]);

    let response = channel
        .send_expect_multi_line("AT+CMGL=4", Some("+CMGL:"))
        .unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert!(response.lines().is_empty());
}

#[test]
fn test_empty_lines_are_ignored() {
    let (channel, device) = setup_channel();
    let events = channel.subscribe();
    let device_thread = respond(&device, "AT\r", &["", "OK"]);

    let response = channel.send(command("AT", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
}

// =============================================================================
// Final Response Tests
// =============================================================================

#[test]
fn test_cme_error_final_response() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CPIN?\r", &["+CME ERROR: 10"]);

    let response = channel.send_expect_single_line("AT+CPIN?", "+CPIN:").unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
    assert_eq!(response.final_line(), "+CME ERROR: 10");
    let code = response.error_code().unwrap();
    assert_eq!(code.category, ErrorCategory::Equipment);
    assert_eq!(code.code, 10);
}

#[test]
fn test_error_after_intermediate_keeps_lines() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+COPS=?\r", &["+COPS: (2,\"NL KPN\")", "ERROR"]);

    let cmd = command("AT+COPS=?", Classification::MultiLine).with_prefix("+COPS:");
    let response = channel.send(cmd).unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
    assert_eq!(response.lines().len(), 1);
    assert_eq!(response.error_code(), None);
}

#[test]
fn test_no_carrier_is_error_without_code() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "ATD+31612345678;\r", &["NO CARRIER"]);

    let response = channel
        .send(command("ATD+31612345678;", Classification::NoResult))
        .unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
    assert_eq!(response.error_code(), None);
}

#[test]
fn test_connect_is_success() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "ATD*99#\r", &["CONNECT 150000000"]);

    let response = channel
        .send(command("ATD*99#", Classification::NoResult))
        .unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(response.final_line(), "CONNECT 150000000");
}

// =============================================================================
// Payload Tests
// =============================================================================

#[test]
fn test_send_with_payload() {
    let (channel, device) = setup_channel();
    let payload = b"0011000B916407281553F80000AA0AE8329BFD4697D9EC37".to_vec();

    let device_thread = {
        let device = device.clone();
        let mut expected = payload.clone();
        expected.push(0x1A);
        thread::spawn(move || {
            assert!(device.wait_for_written(b"AT+CMGS=23\r", WAIT));
            device.feed(b"> ");
            assert!(device.wait_for_written(&expected, WAIT));
            device.feed_line("+CMGS: 12");
            device.feed_line("OK");
        })
    };

    let response = channel
        .send_with_payload("AT+CMGS=23", payload, "+CMGS:")
        .unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(response.lines(), &["+CMGS: 12".to_string()]);
}

#[test]
fn test_payload_written_once_on_repeated_prompt() {
    let (channel, device) = setup_channel();

    let device_thread = {
        let device = device.clone();
        thread::spawn(move || {
            assert!(device.wait_for_written(b"AT+QFUPL=\"a.txt\",3\r", WAIT));
            device.feed(b"> ");
            assert!(device.wait_for_written(b"abc\x1A", WAIT));
            device.feed(b"> ");
            thread::sleep(Duration::from_millis(50));
            device.feed_line("+QFUPL: 3,613e");
            device.feed_line("OK");
        })
    };

    let response = channel
        .send_with_payload("AT+QFUPL=\"a.txt\",3", b"abc".to_vec(), "+QFUPL:")
        .unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(device.written(), b"AT+QFUPL=\"a.txt\",3\rabc\x1A".to_vec());
}

#[test]
fn test_payload_command_without_result_line_is_downgraded() {
    let (channel, device) = setup_channel();

    let device_thread = {
        let device = device.clone();
        thread::spawn(move || {
            assert!(device.wait_for_written(b"AT+CMGS=2\r", WAIT));
            device.feed(b"> ");
            assert!(device.wait_for_written(b"hi\x1A", WAIT));
            device.feed_line("OK");
        })
    };

    let response = channel
        .send_with_payload("AT+CMGS=2", b"hi".to_vec(), "+CMGS:")
        .unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_timeout_when_device_is_silent() {
    let (channel, _device) = setup_channel();
    let cmd = Command::new("AT+COPS?", Classification::SingleLine, Duration::from_millis(50))
        .with_prefix("+COPS:");

    let start = Instant::now();
    let response = channel.send(cmd).unwrap();

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(response.status(), Status::Timeout);
    assert!(!response.is_success());
    assert_eq!(response.final_line(), TIMEOUT_FINAL_LINE);
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(channel.stats().commands_timed_out, 1);
}

#[test]
fn test_timeout_keeps_collected_lines() {
    let (channel, device) = setup_channel();
    let device_thread = respond(&device, "AT+CMGL\r", &["+CMGL: 1", "+CMGL: 2"]);

    let cmd = Command::new("AT+CMGL", Classification::MultiLine, Duration::from_millis(150))
        .with_prefix("+CMGL:");
    let response = channel.send(cmd).unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Timeout);
    assert_eq!(response.lines().len(), 2);
}

#[test]
fn test_late_final_line_completes_next_command() {
    let (channel, device) = setup_channel();

    let first = Command::new("AT+SLOW", Classification::NoResult, Duration::from_millis(40));
    assert_eq!(channel.send(first).unwrap().status(), Status::Timeout);

    // The slow command's ERROR arrives after the next command was issued
    let device_thread = respond(&device, "AT\r", &["ERROR", "OK"]);
    let response = channel.send(command("AT", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();

    assert_eq!(response.status(), Status::Error);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_sends_are_serialized() {
    let (channel, device) = setup_channel();
    let channel = Arc::new(channel);

    let first = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.send(command("AT+FIRST", Classification::NoResult)))
    };
    assert!(device.wait_for_written(b"AT+FIRST\r", WAIT));
    assert_eq!(channel.state(), ChannelState::Awaiting);

    let second = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.send(command("AT+SECOND", Classification::NoResult)))
    };

    // Second caller must wait for the first command to complete
    assert!(!device.wait_for_written(b"AT+SECOND\r", Duration::from_millis(100)));
    device.feed_line("OK");
    assert!(first.join().unwrap().unwrap().is_success());

    assert!(device.wait_for_written(b"AT+SECOND\r", WAIT));
    device.feed_line("ERROR");
    assert_eq!(second.join().unwrap().unwrap().status(), Status::Error);

    assert_eq!(channel.state(), ChannelState::Idle);
}

#[test]
fn test_stop_unblocks_waiting_caller() {
    let (channel, device) = setup_channel();
    let channel = Arc::new(channel);

    let caller = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            channel.send(Command::new("AT+COPS=0", Classification::NoResult, Duration::from_secs(30)))
        })
    };
    assert!(device.wait_for_written(b"AT+COPS=0\r", WAIT));

    let start = Instant::now();
    channel.stop();
    let response = caller.join().unwrap().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(response.status(), Status::Closed);
    assert_eq!(response.final_line(), CLOSED_FINAL_LINE);
    assert!(!channel.is_running());
}

#[test]
fn test_end_of_stream_unblocks_caller_and_closes_channel() {
    let (channel, device) = setup_channel();
    let channel = Arc::new(channel);

    let caller = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            channel.send(Command::new("AT+CFUN=1,1", Classification::NoResult, Duration::from_secs(30)))
        })
    };
    assert!(device.wait_for_written(b"AT+CFUN=1,1\r", WAIT));
    device.close();

    let response = caller.join().unwrap().unwrap();
    assert_eq!(response.status(), Status::Closed);
    assert!(channel.is_closed());

    let result = channel.send(command("AT", Classification::NoResult));
    assert!(matches!(result, Err(AtError::ChannelClosed)));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_send_before_start_fails() {
    let (channel, _device) = open_channel();

    let result = channel.send(command("AT", Classification::NoResult));
    assert!(matches!(result, Err(AtError::NotStarted)));
}

#[test]
fn test_start_twice_fails() {
    let (channel, _device) = setup_channel();
    assert!(matches!(channel.start(), Err(AtError::AlreadyStarted)));
}

#[test]
fn test_stop_then_restart() {
    let (channel, device) = setup_channel();
    channel.stop();
    assert!(!channel.is_running());
    assert!(matches!(
        channel.send(command("AT", Classification::NoResult)),
        Err(AtError::NotStarted)
    ));

    channel.start().unwrap();
    let device_thread = respond(&device, "AT\r", &["OK"]);
    let response = channel.send(command("AT", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
}

#[test]
fn test_start_discards_stale_input() {
    let (channel, device) = open_channel();
    device.feed(b"RDY\r\n+CFUN: 1\r\n");

    let events = channel.subscribe();
    channel.start().unwrap();

    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(device.unread(), 0);
}

#[test]
fn test_clear_reports_dropped_bytes() {
    let (channel, device) = open_channel();
    device.feed(b"garbage\r\n");

    assert_eq!(channel.clear().unwrap(), 9);
}

#[test]
fn test_close_is_clean() {
    let (channel, _device) = setup_channel();
    channel.close();
}

#[test]
fn test_invalid_config_rejected() {
    let (reader, writer, _device) = LoopbackPort::new(Duration::from_millis(5));
    let config = ChannelConfig::builder().event_queue_capacity(0).build();

    let result = AtChannel::open(reader, writer, config);
    assert!(matches!(result, Err(AtError::Config(_))));
}

// =============================================================================
// Raw I/O Tests
// =============================================================================

#[test]
fn test_send_raw_no_ack() {
    let (channel, device) = setup_channel();

    channel.send_raw_no_ack(b"+++").unwrap();

    assert!(device.wait_for_written(b"+++", WAIT));
    assert_eq!(device.written(), b"+++".to_vec());
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[test]
fn test_read_line_outside_command_machinery() {
    let (channel, device) = open_channel();
    device.feed_line("RDY");

    assert_eq!(channel.read_line(WAIT).unwrap(), "RDY");
}

#[test]
fn test_read_line_times_out() {
    let (channel, _device) = open_channel();

    let start = Instant::now();
    let result = channel.read_line(Duration::from_millis(40));

    assert!(matches!(result, Err(AtError::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_read_raw_bytes() {
    let (channel, device) = open_channel();
    device.feed(b"\x01\x02\r\n> \xff");

    let bytes = channel.read_raw_bytes(6).unwrap();
    assert_eq!(&bytes[..], b"\x01\x02\r\n> ");
}

#[test]
fn test_read_raw_bytes_times_out() {
    let (channel, device) = open_channel();
    channel.set_default_timeout(Duration::from_millis(40));
    device.feed(b"ab");

    assert!(matches!(channel.read_raw_bytes(3), Err(AtError::Timeout)));
}

#[test]
fn test_read_line_with_unbounded_timeout() {
    let (channel, device) = open_channel();
    device.feed_line("RDY");

    assert_eq!(channel.read_line(Duration::MAX).unwrap(), "RDY");
}

#[test]
fn test_unbounded_default_timeout_saturates() {
    let (channel, device) = open_channel();
    channel.set_default_timeout(Duration::MAX);
    assert_eq!(channel.default_timeout(), Duration::from_millis(u64::MAX));

    device.feed(b"\x10\x20\x30");
    let bytes = channel.read_raw_bytes(3).unwrap();
    assert_eq!(&bytes[..], b"\x10\x20\x30");
}

// =============================================================================
// Robustness Tests
// =============================================================================

#[test]
fn test_malformed_line_does_not_stop_read_loop() {
    let (channel, device) = setup_channel();

    let device_thread = {
        let device = device.clone();
        thread::spawn(move || {
            assert!(device.wait_for_written(b"AT+CSQ\r", WAIT));
            device.feed(b"\xff\xfe\r\n");
            device.feed_line("+CSQ: 20,99");
            device.feed_line("OK");
        })
    };

    let response = channel.send_expect_single_line("AT+CSQ", "+CSQ:").unwrap();
    device_thread.join().unwrap();

    assert!(response.is_success());
    assert_eq!(response.first_line(), Some("+CSQ: 20,99"));
    assert_eq!(channel.stats().malformed_lines, 1);
}

#[test]
fn test_final_line_without_command_is_ignored() {
    let (channel, device) = setup_channel();
    let events = channel.subscribe();

    device.feed_line("OK");
    assert!(events.recv_timeout(Duration::from_millis(50)).is_err());

    let device_thread = respond(&device, "AT\r", &["OK"]);
    let response = channel.send(command("AT", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();
    assert!(response.is_success());
}

#[test]
fn test_stats_counts_outcomes() {
    let (channel, device) = setup_channel();

    let device_thread = respond(&device, "AT\r", &["OK"]);
    channel.send(command("AT", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();

    let device_thread = respond(&device, "AT+X\r", &["ERROR"]);
    channel.send(command("AT+X", Classification::NoResult)).unwrap();
    device_thread.join().unwrap();

    let stats = channel.stats();
    assert_eq!(stats.commands_sent, 2);
    assert_eq!(stats.commands_succeeded, 1);
    assert_eq!(stats.commands_failed, 1);
    assert_eq!(stats.commands_timed_out, 0);
}

#[test]
fn test_default_timeout_and_trace_settings() {
    let (channel, _device) = open_channel();

    assert_eq!(channel.default_timeout(), Duration::from_millis(2000));
    channel.set_default_timeout(Duration::from_millis(750));
    assert_eq!(channel.default_timeout(), Duration::from_millis(750));

    channel.set_trace(true);
    assert!(!channel.config().trace);
}
