//! Stage ordering and terminal results of whole submissions.

use std::io;
use std::thread;
use std::time::Duration;

use picokernel::device::PortInfo;
use picokernel::{ExecuteReply, ExecutionResult, Stage, StreamChunk};

use crate::fixtures::{
    fault_at, line_at, FakePorts, FakeRunner, Harness, TimelineOpener, PICO_PATH,
};

const BLINK: &str = "#include \"pico/stdlib.h\"\nint main() { stdio_init_all(); }\n";

#[test]
fn test_empty_submission_touches_nothing() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::with_pico(),
        TimelineOpener::new(vec![line_at(0, "unused\n")]),
    );
    let mut session = harness.session(100);

    for code in ["", "   ", "\n\t\n"] {
        let mut chunks: Vec<StreamChunk> = Vec::new();
        let result = session.execute(code, &mut chunks);
        assert_eq!(result, ExecutionResult::empty());
        assert!(chunks.is_empty());
    }

    // Blank cells still take an execution count
    assert_eq!(session.execution_count(), 3);
    assert!(harness.runner.calls().is_empty());
    assert_eq!(harness.ports.lookups(), 0);
    assert!(harness.opener.opened().is_empty());
    assert!(!harness.workdir().join("main.c").exists());
}

#[test]
fn test_build_failure_stops_before_flash() {
    let stderr = "main.c:2:14: error: 'stdio_init_al' undeclared\nmake: *** [all] Error 1\n";
    let harness = Harness::new(
        FakeRunner::new().failing("build_code.sh", 2, stderr),
        FakePorts::with_pico(),
        TimelineOpener::new(Vec::new()),
    );
    let mut session = harness.session(100);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    assert_eq!(
        result,
        ExecutionResult::BuildFailed {
            exit_code: Some(2),
            stderr: stderr.to_string(),
        }
    );
    assert_eq!(session.stage(), Stage::BuildFailed);
    assert_eq!(harness.runner.calls(), vec!["build_code.sh"]);
    assert_eq!(harness.ports.lookups(), 0);
    assert!(harness.opener.opened().is_empty());

    // The source was written before the build ran
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].text.starts_with("Wrote source to "));
    assert!(result.message().contains(stderr));
}

#[test]
fn test_flash_failure_stops_before_discovery() {
    let harness = Harness::new(
        FakeRunner::new()
            .printing("build_code.sh", "[100%] Built target blink\n")
            .failing(
                "load_code.sh",
                1,
                "No accessible RP2040 devices in BOOTSEL mode were found.\n",
            ),
        FakePorts::with_pico(),
        TimelineOpener::new(Vec::new()),
    );
    let mut session = harness.session(100);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    match &result {
        ExecutionResult::FlashFailed { exit_code, stderr } => {
            assert_eq!(*exit_code, Some(1));
            assert_eq!(
                stderr,
                "No accessible RP2040 devices in BOOTSEL mode were found.\n"
            );
        }
        other => panic!("Expected FlashFailed, got {:?}", other),
    }
    assert_eq!(harness.runner.calls(), vec!["build_code.sh", "load_code.sh"]);
    assert_eq!(harness.ports.lookups(), 0);
    assert!(harness.opener.opened().is_empty());
}

#[test]
fn test_missing_device_is_reported_distinctly() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::without_pico(),
        TimelineOpener::new(Vec::new()),
    );
    let mut session = harness.session(100);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    assert_eq!(result, ExecutionResult::DeviceNotFound);
    assert_eq!(session.stage(), Stage::DeviceNotFound);
    assert_eq!(harness.ports.lookups(), 1);
    assert!(harness.opener.opened().is_empty());

    let reply = serde_json::to_value(ExecuteReply::from_result(&result, 1)).unwrap();
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["evalue"], "No Pico found via USB serial.");
}

#[test]
fn test_port_listing_failure_is_not_a_missing_device() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::failing("/sys/class/tty: permission denied"),
        TimelineOpener::new(Vec::new()),
    );
    let mut session = harness.session(100);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    match &result {
        ExecutionResult::DeviceLookupFailed { cause } => {
            assert!(cause.contains("/sys/class/tty: permission denied"));
        }
        other => panic!("Expected DeviceLookupFailed, got {:?}", other),
    }
    assert_ne!(result, ExecutionResult::DeviceNotFound);
    assert_eq!(session.stage(), Stage::DeviceLookupFailed);
    assert_eq!(harness.ports.lookups(), 1);
    assert!(harness.opener.opened().is_empty());

    let reply = serde_json::to_value(ExecuteReply::from_result(&result, 1)).unwrap();
    assert_eq!(reply["status"], "error");
    let evalue = reply["evalue"].as_str().unwrap();
    assert!(evalue.starts_with("Could not list serial ports: "));
    assert!(evalue.contains("/sys/class/tty: permission denied"));
}

#[test]
fn test_successful_run_streams_everything_in_order() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::with_pico(),
        TimelineOpener::new(vec![
            line_at(0, "Hello from Pico\r\n"),
            line_at(10, "LED on\r\nLED off\r\n"),
            line_at(40, "done\r\n"),
        ]),
    );
    let mut session = harness.session(150);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let wrote = format!("Wrote source to {}\n", harness.workdir().join("main.c").display());
    assert_eq!(
        texts,
        vec![
            wrote.as_str(),
            "Reading output from /dev/ttyACM0...\n",
            "Hello from Pico\r\n",
            "LED on\r\n",
            "LED off\r\n",
            "done\r\n",
        ]
    );
    assert!(chunks.iter().all(|c| c.name == "stdout"));

    assert_eq!(
        result,
        ExecutionResult::finished(
            "Hello from Pico\r\nLED on\r\nLED off\r\ndone\r\n".to_string(),
            4
        )
    );
    assert_eq!(session.stage(), Stage::Done);
    assert_eq!(
        harness.runner.calls(),
        vec!["build_code.sh", "load_code.sh"]
    );

    let opened = harness.opener.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].device, PICO_PATH);
    assert_eq!(opened[0].baud_rate, 115_200);
    assert_eq!(opened[0].poll_timeout, Duration::from_millis(20));
    assert_eq!(harness.opener.port_closed(), Some(true));

    let reply = serde_json::to_value(ExecuteReply::from_result(&result, session.execution_count()))
        .unwrap();
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["execution_count"], 1);
    assert_eq!(reply["data"]["text/plain"], "Finished reading Pico output.");
}

#[test]
fn test_only_matching_device_is_opened() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::new(vec![
            PortInfo::usb("/dev/ttyACM0", 0x2E8A, 0x0003),
            PortInfo::usb("/dev/ttyUSB0", 0x0403, 0x6001),
            PortInfo::usb("/dev/ttyACM1", 0x2E8A, 0x000B),
        ]),
        TimelineOpener::new(vec![line_at(0, "ready\n")]),
    );
    let mut session = harness.session(80);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    assert!(result.is_success());
    assert_eq!(harness.opener.opened()[0].device, "/dev/ttyACM1");
}

#[test]
fn test_serial_fault_keeps_lines_already_streamed() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::with_pico(),
        TimelineOpener::new(vec![
            line_at(0, "sample 1\n"),
            line_at(20, "sample 2\n"),
            fault_at(40, io::ErrorKind::BrokenPipe),
            line_at(60, "never seen\n"),
        ]),
    );
    let mut session = harness.session(500);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    assert_eq!(
        result,
        ExecutionResult::SerialReadFault {
            cause: "simulated device fault".to_string(),
        }
    );
    assert_eq!(session.stage(), Stage::SerialFault);
    assert_ne!(result, ExecutionResult::DeviceNotFound);

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(&texts[2..], &["sample 1\n", "sample 2\n"]);
    assert_eq!(harness.opener.port_closed(), Some(true));
    assert_eq!(result.message(), "Serial read error: simulated device fault");
}

#[test]
fn test_port_that_cannot_be_opened_is_a_serial_fault() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::with_pico(),
        TimelineOpener::refusing(),
    );
    let mut session = harness.session(100);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);

    match result {
        ExecutionResult::SerialReadFault { cause } => {
            assert!(cause.contains("Device or resource busy"));
        }
        other => panic!("Expected SerialReadFault, got {:?}", other),
    }
}

#[test]
fn test_cancel_during_stream_closes_port() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::with_pico(),
        TimelineOpener::new(vec![line_at(0, "booted\n")]),
    );
    // Idle timeout far longer than the test
    let mut session = harness.session(60_000);
    let token = session.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        token.cancel();
    });
    let mut chunks: Vec<StreamChunk> = Vec::new();

    let result = session.execute(BLINK, &mut chunks);
    canceller.join().unwrap();

    assert_eq!(result, ExecutionResult::Cancelled { lines: 1 });
    assert_eq!(session.stage(), Stage::Cancelled);
    assert_eq!(harness.opener.port_closed(), Some(true));
}

#[test]
fn test_each_submission_is_a_fresh_run() {
    let harness = Harness::new(
        FakeRunner::new(),
        FakePorts::without_pico(),
        TimelineOpener::new(Vec::new()),
    );
    let mut session = harness.session(100);
    let mut chunks: Vec<StreamChunk> = Vec::new();

    session.execute("int a;", &mut chunks);
    session.execute("int b;", &mut chunks);

    assert_eq!(session.execution_count(), 2);
    assert_eq!(harness.ports.lookups(), 2);
    assert_eq!(
        std::fs::read_to_string(harness.workdir().join("main.c")).unwrap(),
        "int b;"
    );
    assert_eq!(
        harness.runner.calls(),
        vec!["build_code.sh", "load_code.sh", "build_code.sh", "load_code.sh"]
    );
}
