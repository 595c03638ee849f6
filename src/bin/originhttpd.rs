//! Static-file server: a thin consumer of the library's public callback
//! contract. `chroot`s into the served directory and drops privileges before
//! the dispatcher starts accepting connections.

use std::ffi::CString;
use std::path::{Component, Path, PathBuf};

use clap::Parser as ClapParser;
use originhttp::{Dispatcher, Method, Request};

#[derive(ClapParser, Debug)]
#[command(name = "originhttpd", about = "Serve static files over HTTP/1.1")]
struct Args {
    #[arg(short = 'p', long = "port", default_value_t = 8080)]
    port: u16,

    #[arg(long = "chroot-user")]
    chroot_user: Option<String>,

    directory: PathBuf,
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Rejects any path carrying a `..` component after decode, even though
/// `chroot` already constrains the filesystem view.
fn resolve(path: &str) -> Option<PathBuf> {
    let decoded = originhttp::url::decode(path)?;
    let rel = decoded.trim_start_matches('/');
    let candidate = Path::new(rel);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }
    Some(PathBuf::from(rel))
}

fn handle(req: &mut Request<'_>) {
    if !matches!(req.method, Method::Get | Method::Head) {
        req.response.set_status(405).unwrap();
        req.response.set_body(b"Method Not Allowed");
        return;
    }

    let file_path = match resolve(&req.path) {
        Some(p) => p,
        None => {
            req.response.set_status(404).unwrap();
            req.response.set_body(b"Not Found");
            return;
        }
    };

    match std::fs::read(&file_path) {
        Ok(body) => {
            req.response
                .set_header("Content-Type", content_type(&file_path))
                .unwrap();
            if req.method == Method::Get {
                req.response.set_body(&body);
            }
        }
        Err(_) => {
            req.response.set_status(404).unwrap();
            req.response.set_body(b"Not Found");
        }
    }
}

#[cfg(unix)]
fn drop_privileges(directory: &Path, user: &str) -> std::io::Result<()> {
    let dir = CString::new(directory.as_os_str().to_str().unwrap())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "NUL in path"))?;
    let user_c = CString::new(user)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "NUL in username"))?;

    // SAFETY: `dir` and `user_c` are valid, NUL-terminated C strings owned
    // for the duration of the calls below.
    unsafe {
        if libc::chroot(dir.as_ptr()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::chdir(b"/\0".as_ptr() as *const libc::c_char) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let pwd = libc::getpwnam(user_c.as_ptr());
        let (uid, gid) = if pwd.is_null() {
            log::warn!("user {user} not found, falling back to nobody (65534)");
            (65534, 65534)
        } else {
            ((*pwd).pw_uid, (*pwd).pw_gid)
        };

        // gid before uid: dropping uid first would leave the process unable
        // to drop gid.
        if libc::setgid(gid) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::setuid(uid) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut dispatcher = match Dispatcher::new(args.port) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to start: {e}");
            std::process::exit(1);
        }
    };

    #[cfg(unix)]
    if let Some(user) = &args.chroot_user {
        if let Err(e) = drop_privileges(&args.directory, user) {
            eprintln!("failed to drop privileges: {e}");
            std::process::exit(1);
        }
    } else if std::env::set_current_dir(&args.directory).is_err() {
        eprintln!("failed to chdir into {}", args.directory.display());
        std::process::exit(1);
    }

    #[cfg(not(unix))]
    {
        if std::env::set_current_dir(&args.directory).is_err() {
            eprintln!("failed to chdir into {}", args.directory.display());
            std::process::exit(1);
        }
    }

    let shutdown = dispatcher.shutdown_handle();
    install_signal_handlers(shutdown);

    log::info!("serving {} on port {}", args.directory.display(), args.port);
    match dispatcher.dispatch(handle) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("dispatch failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Out of scope for the core library: wires `SIGINT`/`SIGTERM` to the
/// shutdown handle so `Ctrl-C` stops the demo cleanly.
#[cfg(unix)]
fn install_signal_handlers(handle: originhttp::ShutdownHandle) {
    static mut HANDLE: Option<originhttp::ShutdownHandle> = None;
    unsafe {
        HANDLE = Some(handle);
    }

    extern "C" fn on_signal(_sig: libc::c_int) {
        unsafe {
            #[allow(static_mut_refs)]
            if let Some(h) = HANDLE.as_ref() {
                let _ = h.stop();
            }
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_handle: originhttp::ShutdownHandle) {}
