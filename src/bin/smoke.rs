use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Runtime;
use tv_sleep_lib::app::adb::locator::{shell_adb_program, validate_adb_program};
use tv_sleep_lib::app::config::load_config;
use tv_sleep_lib::app::models::{ConnectionState, TimeOption, TimerState};
use tv_sleep_lib::app::state::AppState;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    out_dir: Option<PathBuf>,
    json: bool,
    host: bool,
    timer_ms: u64,
    sleep: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    started_at: String,
    finished_at: String,
    adb_program: Option<String>,
    shell_pid: Option<u32>,
    out_dir: String,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut out_dir: Option<PathBuf> = None;
    let mut json = false;
    let mut host = false;
    let mut timer_ms = 2_000u64;
    let mut sleep = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--json" => {
                json = true;
            }
            "--host" => {
                host = true;
            }
            "--timer-ms" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--timer-ms requires a value".to_string())?;
                timer_ms = value
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms >= 250)
                    .ok_or_else(|| format!("--timer-ms must be at least 250, got {value}"))?;
            }
            "--sleep" => {
                sleep = true;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--out DIR] [--json] [--host] [--timer-ms MS] [--sleep]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        out_dir,
        json,
        host,
        timer_ms,
        sleep,
    })
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|err| format!("Failed to create dir {}: {err}", path.display()))
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> Result<(), ()>
where
    F: FnOnce() -> Result<Vec<String>, (&'static str, String)>,
{
    let start = Instant::now();
    match f() {
        Ok(artifacts) => {
            checks.push(SmokeCheck {
                name,
                status: "pass",
                duration_ms: start.elapsed().as_millis(),
                artifacts,
                error_code: None,
                error: None,
            });
            Ok(())
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                artifacts: vec![],
                error_code: Some(code),
                error: Some(err),
            });
            Err(())
        }
    }
}

fn skip(checks: &mut Vec<SmokeCheck>, name: &'static str) {
    checks.push(SmokeCheck {
        name,
        status: "skip",
        duration_ms: 0,
        artifacts: vec![],
        error_code: None,
        error: None,
    });
}

async fn wait_for_output(state: &AppState, needle: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if state.session.read_output().contains(needle) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn print_summary(summary: &SmokeSummary, json: bool) {
    let rendered = if json {
        serde_json::to_string(summary)
    } else {
        serde_json::to_string_pretty(summary)
    };
    println!("{}", rendered.unwrap_or_default());
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let started_at = Utc::now().to_rfc3339();
    let out_dir = args.out_dir.clone().unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("tv_sleep_smoke_{trace_id}"));
        p
    });
    if let Err(err) = ensure_dir(&out_dir) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let mut checks: Vec<SmokeCheck> = Vec::new();
    let mut status = "pass";
    let mut adb_program = None;
    let mut shell_pid = None;

    let mut config = None;
    if run_check(&mut checks, "load_config", || {
        let mut loaded = load_config().map_err(|err| ("ERR_CONFIG", err.to_string()))?;
        if args.host {
            loaded.bootstrap.use_device_settings = false;
        }
        if !args.sleep {
            loaded.sleep.sleep_command = format!("echo 'smoke sleep {trace_id}'");
        }
        config = Some(loaded);
        Ok(vec![])
    })
    .is_err()
    {
        status = "fail";
    }

    let runtime = Runtime::new();
    let state = match (config, runtime) {
        (Some(config), Ok(runtime)) => {
            let program = shell_adb_program(&config.shell.adb_path, &config.shell.native_library_dir);
            if run_check(&mut checks, "check_adb", || {
                validate_adb_program(&program, &trace_id)
                    .map_err(|err| ("ERR_CHECK_ADB", err.to_string()))?;
                Ok(vec![])
            })
            .is_err()
            {
                status = "fail";
            }
            adb_program = Some(program);
            match AppState::new(config, runtime.handle().clone()) {
                Ok(state) => Some((runtime, state)),
                Err(err) => {
                    checks.push(SmokeCheck {
                        name: "app_state",
                        status: "fail",
                        duration_ms: 0,
                        artifacts: vec![],
                        error_code: Some("ERR_STATE"),
                        error: Some(err.to_string()),
                    });
                    status = "fail";
                    None
                }
            }
        }
        (_, Err(err)) => {
            checks.push(SmokeCheck {
                name: "runtime",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some("ERR_RUNTIME"),
                error: Some(err.to_string()),
            });
            status = "fail";
            None
        }
        (None, Ok(_)) => None,
    };

    if let Some((runtime, state)) = state {
        let connected = run_check(&mut checks, "bootstrap", || {
            runtime.block_on(async {
                let ready = tokio::time::timeout(Duration::from_secs(120), state.connect())
                    .await
                    .map_err(|_| ("ERR_TIMEOUT", "Bootstrap did not finish in time".to_string()))?;
                if !ready {
                    let reason = match state.session.state() {
                        ConnectionState::Failed(reason) => reason,
                        other => format!("{other:?}"),
                    };
                    return Err(("ERR_BOOTSTRAP", reason));
                }
                Ok(vec![])
            })
        })
        .is_ok();

        if connected {
            shell_pid = runtime.block_on(state.session.shell_pid());

            if run_check(&mut checks, "echo_round_trip", || {
                runtime.block_on(async {
                    let marker = format!("smoke echo {trace_id}");
                    state.session.send_to_shell_process(&format!("echo '{marker}'")).await;
                    if wait_for_output(&state, &marker, Duration::from_secs(10)).await {
                        Ok(vec![])
                    } else {
                        Err(("ERR_ECHO", "Shell did not echo the marker".to_string()))
                    }
                })
            })
            .is_err()
            {
                status = "fail";
            }

            if run_check(&mut checks, "timer_run", || {
                runtime.block_on(async {
                    let mut states = state.timer.subscribe_state();
                    state
                        .timer
                        .select_time(&TimeOption::new("smoke", "Smoke", args.timer_ms));
                    state.timer.start();
                    let limit = Duration::from_millis(args.timer_ms) + Duration::from_secs(5);
                    tokio::time::timeout(limit, states.wait_for(|state| *state == TimerState::Finished))
                        .await
                        .map_err(|_| ("ERR_TIMEOUT", "Timer did not finish in time".to_string()))?
                        .map_err(|err| ("ERR_TIMER", err.to_string()))?;
                    if !args.sleep
                        && !wait_for_output(&state, "smoke sleep", Duration::from_secs(10)).await
                    {
                        return Err(("ERR_SLEEP", "Sleep command never reached the shell".to_string()));
                    }
                    Ok(vec![])
                })
            })
            .is_err()
            {
                status = "fail";
            }
        } else {
            status = "fail";
            skip(&mut checks, "echo_round_trip");
            skip(&mut checks, "timer_run");
        }

        let _ = run_check(&mut checks, "output_tail", || {
            let path = out_dir.join("output.txt");
            fs::write(&path, state.session.read_output())
                .map_err(|err| ("ERR_IO", format!("Failed to write output tail: {err}")))?;
            Ok(vec![path.to_string_lossy().to_string()])
        });

        runtime.block_on(state.shutdown());
    }

    let summary = SmokeSummary {
        tool: "tv_sleep_smoke",
        status,
        trace_id,
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        adb_program,
        shell_pid,
        out_dir: out_dir.to_string_lossy().to_string(),
        checks,
    };
    print_summary(&summary, args.json);
    if status != "pass" {
        std::process::exit(1);
    }
}
