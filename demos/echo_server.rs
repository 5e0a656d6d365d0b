//! Echo server: listens on the per-user socket and writes every message
//! straight back. Run the `echo_client` example against it.

use std::sync::{Arc, Mutex};

use pipelink::{
    platform, Collector, CollectorStatus, Descriptor, PipeConfig, Piper, PiperDelegate,
    PiperHandle, Result,
};

struct EchoDelegate {
    handle: Mutex<Option<PiperHandle>>,
}

impl PiperDelegate for EchoDelegate {
    fn startup(&self, piper: &PiperHandle) -> Result<()> {
        *self.handle.lock().unwrap() = Some(piper.clone());
        Ok(())
    }

    fn shutdown(&self) {}

    fn on_new_connection(&self, listener: Descriptor, pipe: Descriptor) {
        println!("[echo] connection {pipe} on listener {listener}");
    }

    fn on_pipe_closed(&self, pipe: Descriptor, code: i32) {
        println!("[echo] pipe {pipe} closed (code {code})");
    }

    fn on_message(&self, pipe: Descriptor, collector: &mut Collector) {
        let (status, message) = collector.take_message();
        if status == CollectorStatus::HasMessage {
            let handle = self.handle.lock().unwrap().clone().expect("running");
            handle.write_with(pipe, message, |_| {});
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    platform::configure_signals();

    let config = PipeConfig::default_for_app("pipelink-echo");
    platform::ensure_socket_directory(&config)?;
    platform::delete_socket_file(&config)?;

    let piper = Piper::new(Arc::new(EchoDelegate {
        handle: Mutex::new(None),
    }))?;

    let address = config.pipe_name();
    let (listener, code) = piper.listen(&address).wait()?;
    if code != 0 {
        eprintln!("listen on {address} failed: {code}");
        std::process::exit(1);
    }
    println!("[echo] listening on {address} (descriptor {listener}); press Enter to quit");

    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    Ok(())
}
