//! Interactive host for the colloquy speech bridge.
//!
//! Wires the stub engines into a `SpeechController` and drives it from
//! stdin, so the full coordination path (permission gate, session state
//! machine, synthesis queue, pre-emption) can be exercised without any
//! real audio hardware.
//!
//! ```text
//! rec           start a recording session
//! stop          stop the session (graceful flush)
//! say <text>    queue text for synthesis
//! mute          cancel synthesis immediately
//! perm          resolve the permission state
//! status        print bridge state + counters
//! quit          dispose and exit
//! ```

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use colloquy_core::engines::stub::{
    ScriptedFragment, ScriptedRecognition, StubPermission, StubSynthesis,
};
use colloquy_core::{SessionSignal, SpeechController};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    /// The stub permission provider denies access.
    deny: bool,
    /// Simulated playback pacing, in milliseconds per character.
    char_ms: u64,
    /// Skip tracing output.
    quiet: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        deny: false,
        char_ms: 30,
        quiet: false,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--deny" => args.deny = true,
            "--quiet" => args.quiet = true,
            "--char-ms" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --char-ms");
                };
                args.char_ms = v
                    .parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("invalid value for --char-ms"))?
                    .clamp(1, 1_000);
            }
            "--help" | "-h" => {
                println!("Usage: colloquy [--deny] [--char-ms <n>] [--quiet]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    Ok(args)
}

/// Recognition script replayed by the stub engine on every `rec`.
fn demo_script() -> Vec<ScriptedFragment> {
    vec![
        ScriptedFragment::partial("the"),
        ScriptedFragment::partial("the quick"),
        ScriptedFragment::partial("the quick brown"),
        ScriptedFragment::committed("the quick brown fox"),
        ScriptedFragment::partial("jumps"),
        ScriptedFragment::committed("jumps over the lazy dog"),
    ]
}

fn main() {
    if let Err(e) = run() {
        eprintln!("colloquy failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;

    if !args.quiet {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let permission = if args.deny {
        StubPermission::denying().with_delay(Duration::from_millis(300))
    } else {
        StubPermission::granting().with_delay(Duration::from_millis(300))
    };

    let bridge = Arc::new(SpeechController::new(
        Box::new(permission),
        Box::new(ScriptedRecognition::new(demo_script()).with_step(Duration::from_millis(250))),
        Box::new(StubSynthesis::with_pacing(args.char_ms)),
    ));
    info!(deny = args.deny, char_ms = args.char_ms, "bridge ready");

    spawn_utterance_printer(&bridge);

    println!("colloquy interactive host — type 'help' for commands");
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        let (command, rest) = match trimmed.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (trimmed, ""),
        };

        match command {
            "" => {}
            "help" => print_help(),
            "perm" => bridge.request_permission(|state| println!("permission: {state:?}")),
            "rec" => start_recording(&bridge),
            "stop" => bridge.stop_recording(),
            "say" => {
                if rest.is_empty() {
                    println!("usage: say <text>");
                } else {
                    match bridge.start_speaking(rest) {
                        Ok(id) => println!("queued utterance #{id}"),
                        Err(e) => println!("rejected: {e}"),
                    }
                }
            }
            "mute" => bridge.stop_speaking(),
            "status" => print_status(&bridge),
            "quit" | "exit" => break,
            other => println!("unknown command: {other} (try 'help')"),
        }
    }

    bridge.dispose();
    Ok(())
}

fn print_help() {
    println!("  rec           start a recording session");
    println!("  stop          stop the session (graceful flush)");
    println!("  say <text>    queue text for synthesis");
    println!("  mute          cancel synthesis immediately");
    println!("  perm          resolve the permission state");
    println!("  status        print bridge state + counters");
    println!("  quit          dispose and exit");
}

fn start_recording(bridge: &Arc<SpeechController>) {
    let result = |text: &str| println!("  » {text}");
    let status = |signal: SessionSignal| match signal {
        SessionSignal::Starting => println!("[session starting]"),
        SessionSignal::Listening => println!("[listening]"),
        SessionSignal::StoppedNormally => println!("[stopped]"),
        SessionSignal::Failed(reason) => println!("[failed: {reason}]"),
    };

    match bridge.start_recording(result, status) {
        Ok(()) => {}
        Err(e) => println!("cannot record: {e}"),
    }
}

fn print_status(bridge: &Arc<SpeechController>) {
    let state = bridge.state_snapshot();
    let diag = bridge.diagnostics_snapshot();
    println!(
        "permission={:?} session={:?} pending={} speaking={} queued={}",
        state.permission, state.session_status, state.pending_start, state.speaking, state.queue_len
    );
    println!(
        "sessions: {} started / {} completed / {} failed — results: {}",
        diag.sessions_started, diag.sessions_completed, diag.sessions_failed, diag.results_delivered
    );
    println!(
        "utterances: {} enqueued / {} completed / {} cancelled — preemptions: {}",
        diag.utterances_enqueued,
        diag.utterances_completed,
        diag.utterances_cancelled,
        diag.preemptions
    );
}

/// Background printer for utterance lifecycle events.
fn spawn_utterance_printer(bridge: &Arc<SpeechController>) {
    let mut rx = bridge.subscribe_utterances();
    thread::spawn(move || loop {
        match rx.try_recv() {
            Ok(event) => println!("[utterance #{} {:?}: {}]", event.id, event.status, event.text),
            Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(50)),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Closed) => break,
        }
    });
}
