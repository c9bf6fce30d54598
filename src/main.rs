//! Entry point for the **wsmirror** daemon.
//!
//! Opens a session on the compositor's IPC socket, logs the initial state,
//! then logs every change to the mirrored fields until the compositor
//! closes the connection.
//!
//! The socket path comes from `--socket <path>` or `$NIRI_SOCKET`.
//! Verbosity is controlled with `RUST_LOG`.

use log::{error, info};
use std::path::PathBuf;
use wsmirror::config::Config;
use wsmirror::session::Session;
use wsmirror::state::{Change, Field};

/// Resolve the compositor socket path.
fn socket_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--socket" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var_os("NIRI_SOCKET").map(PathBuf::from)
}

/// Resolve the config directory (`$XDG_CONFIG_HOME/wsmirror`).
fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("wsmirror")
}

/// Try to load the config from `$XDG_CONFIG_HOME/wsmirror/config.json`,
/// falling back to compiled-in defaults.
fn load_config() -> Config {
    let path = config_dir().join("config.json");
    match Config::load(&path) {
        Ok(cfg) => {
            info!("loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            info!("no config file ({}), using defaults", e);
            Config::default()
        }
    }
}

//  Main

fn main() {
    env_logger::init();

    let Some(path) = socket_path() else {
        error!("no socket path: pass --socket <path> or set NIRI_SOCKET");
        std::process::exit(1);
    };
    let config = load_config();

    let session = match Session::open(&path, config.session) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = session.current_state();
    info!("{} workspace(s)", state.workspaces.len());
    info!("active workspace: {:?}", state.active_workspace);
    info!("active window: {:?}", state.active_window);

    let watchers: Vec<_> = [Field::Workspaces, Field::ActiveWorkspace, Field::ActiveWindow]
        .into_iter()
        .map(|field| {
            let changes = session.on_change(field);
            std::thread::spawn(move || {
                for change in changes {
                    match change {
                        Change::Workspaces(ws) => info!("workspaces changed: {} total", ws.len()),
                        Change::ActiveWorkspace(ws) => info!("workspace activated: {:?}", ws),
                        Change::ActiveWindow(w) => info!("active window: {:?}", w),
                        Change::Closed => info!("{:?} stream closed", field),
                    }
                }
            })
        })
        .collect();

    for watcher in watchers {
        let _ = watcher.join();
    }
    info!("compositor closed the connection, exiting");
}
