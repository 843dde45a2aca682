use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use unitmesh_link::Link;
use unitmesh_transport::Endpoint;

use crate::cmd::ListenArgs;
use crate::exit::{link_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ListenArgs) -> CliResult<i32> {
    let endpoint = Endpoint::parse(&args.url)
        .map_err(|err| transport_error("bad endpoint", err))?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let _subscription = Link::subscribe(
        &endpoint,
        Arc::new(move |payload| {
            let _ = tx.send(payload.to_vec());
        }),
    )
    .map_err(|err| link_error("subscribe failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handler(Arc::clone(&running))?;

    let stdout = std::io::stdout();
    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let payload = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(payload) => payload,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        let mut out = stdout.lock();
        let _ = out.write_all(&payload);
        if !payload.ends_with(b"\n") {
            let _ = out.write_all(b"\n");
        }
        let _ = out.flush();

        printed = printed.saturating_add(1);
        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

fn install_signal_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
