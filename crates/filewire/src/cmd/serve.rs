use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use filewire_peer::{connect, LocalNode, PeerListener};
use filewire_store::LocalFileStore;

use crate::cmd::ServeArgs;
use crate::exit::{peer_error, store_error, transport_error, CliError, CliResult, SUCCESS};
use crate::watcher;

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let store =
        LocalFileStore::open(&args.share_dir).map_err(|err| store_error("open share dir", err))?;

    let node = LocalNode::new(
        Arc::new(store),
        args.block_size,
        args.max_connections,
        args.advertise.clone(),
    );

    let listener = PeerListener::bind(args.listen.clone(), node.clone())
        .map_err(|err| transport_error("bind listener", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    tracing::info!(
        listen = %args.listen,
        advertise = %args.advertise,
        share_dir = %args.share_dir.display(),
        "filewire node starting"
    );

    std::thread::spawn(move || {
        if let Err(err) = listener.serve_forever() {
            tracing::error!(error = %err, "accept loop ended");
        }
    });

    for peer in args.connect.clone() {
        let node = node.clone();
        tracing::info!(peer = %peer, "connecting to initial peer");
        std::thread::spawn(move || {
            if let Err(err) = connect(node, &peer.host, peer.port) {
                let err = peer_error("connect to initial peer", err);
                tracing::warn!(error = %err, "initial peer connect failed");
            }
        });
    }

    let _watcher = watcher::spawn(args.share_dir.clone(), node.clone())?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutting down");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
