use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio_util::sync::CancellationToken;

/// What should we do when the user stops
/// this program?
///
/// The first SIGINT or SIGTERM asks every task to wind down. A second one
/// while we are still draining exits right away.
pub fn handle_shutdown(stop: CancellationToken) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for signal in signals.forever() {
            if stop.is_cancelled() {
                log::warn!("Received signal {signal} again, exiting now");
                std::process::exit(1);
            }
            log::info!("Received signal {signal}, shutting down");
            let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
            stop.cancel();
        }
    });

    Ok(())
}
