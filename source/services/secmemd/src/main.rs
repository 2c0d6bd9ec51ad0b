//! CONTEXT: secmemd entrypoint wiring logging and arguments to the shared service logic
fn main() {
    env_logger::init();
    if let Err(err) = secmemd::run() {
        eprintln!("secmemd: exited with error: {err}");
        std::process::exit(1);
    }
}
