//! Echo client: sends each command-line argument (or "hello") to the
//! echo server and prints what comes back.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use pipelink::{
    Collector, CollectorStatus, Descriptor, PipeConfig, Piper, PiperDelegate, PiperHandle, Result,
};

struct PrintDelegate {
    echoes: mpsc::Sender<Vec<u8>>,
}

impl PiperDelegate for PrintDelegate {
    fn startup(&self, _piper: &PiperHandle) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {}

    fn on_new_connection(&self, _listener: Descriptor, _pipe: Descriptor) {}

    fn on_pipe_closed(&self, pipe: Descriptor, code: i32) {
        if code != 0 {
            eprintln!("pipe {pipe} closed with code {code}");
        }
    }

    fn on_message(&self, _pipe: Descriptor, collector: &mut Collector) {
        let (status, message) = collector.take_message();
        if status == CollectorStatus::HasMessage {
            let _ = self.echoes.send(message);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let messages: Vec<String> = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            vec!["hello".into()]
        } else {
            args
        }
    };

    let (echoes_tx, echoes_rx) = mpsc::channel();
    let piper = Piper::new(Arc::new(PrintDelegate { echoes: echoes_tx }))?;

    let address = PipeConfig::default_for_app("pipelink-echo").pipe_name();
    let (pipe, code) = piper.connect(&address).wait()?;
    if code != 0 {
        eprintln!("connect to {address} failed: {code} (is echo_server running?)");
        std::process::exit(1);
    }

    for message in messages {
        let code = piper.write(pipe, message.clone().into_bytes()).wait()?;
        if code != 0 {
            eprintln!("write failed: {code}");
            std::process::exit(1);
        }
        match echoes_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(echo) => println!("{} -> {}", message, String::from_utf8_lossy(&echo)),
            Err(_) => {
                eprintln!("no echo for {message:?}");
                std::process::exit(1);
            }
        }
    }

    piper.close(pipe).wait()?;
    Ok(())
}
