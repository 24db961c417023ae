use crate::association::{Association, Event};
use crate::congestion::CongestionAdapter;
use crate::error::{Error, Result};
use crate::probe::ProbeTransport;
use crate::state::Snapshot;
use crate::Notification;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Instant;

#[derive(Debug)]
enum Command {
    Event(Event),
    AddPath(SocketAddr),
    RemovePath(SocketAddr),
    ConnectionUp,
    Wake,
    Shutdown,
}

/// A handle to an [`Association`] running on its own thread.
///
/// Every input is forwarded to the association thread, which owns the
/// association and processes inputs one at a time. The latest state is
/// available at any time with [`Session::snapshot`].
///
/// # Example
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// # use std::net::SocketAddr;
/// # use std::str::FromStr;
/// use pmtud_core::{Builder, CongestionWindows, PacketSize, ProbeHandle, ProbeTransport, Session};
///
/// struct Transport;
///
/// impl ProbeTransport for Transport {
///     fn send_probe(&mut self, _addr: SocketAddr, _size: PacketSize) -> pmtud_core::Result<ProbeHandle> {
///         Ok(ProbeHandle(1))
///     }
///     fn has_capacity(&self, _addr: SocketAddr, _size: PacketSize) -> bool {
///         true
///     }
/// }
///
/// let association = Builder::new().build(Transport, CongestionWindows::new(10), |_| {})?;
/// let (session, handle) = Session::spawn(association)?;
/// session.add_path(SocketAddr::from_str("192.0.2.1:2905")?)?;
/// session.connection_up()?;
/// println!("{:?}", session.snapshot());
/// session.shutdown()?;
/// handle.join().map_err(|_| anyhow::anyhow!("association thread panicked"))??;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    sender: Sender<Command>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl Session {
    /// Run the association on a new thread.
    ///
    /// The thread ends when [`Session::shutdown`] is called, when every
    /// clone of the session is dropped or when the association fails.
    pub fn spawn<T, C, F>(association: Association<T, C, F>) -> Result<(Self, JoinHandle<Result<()>>)>
    where
        T: ProbeTransport + Send + 'static,
        C: CongestionAdapter + Send + 'static,
        F: FnMut(&Notification) + Send + 'static,
    {
        let (sender, receiver) = channel::unbounded();
        let snapshot = Arc::new(RwLock::new(association.snapshot()));
        let shared = snapshot.clone();
        let handle = thread::Builder::new()
            .name(format!("association-{}", association.id()))
            .spawn(move || run(association, &receiver, &shared))
            .map_err(|err| Error::Other(err.to_string()))?;
        Ok((Self { sender, snapshot }, handle))
    }

    /// Report an acknowledgment outcome or loss attribution.
    pub fn post(&self, event: Event) -> Result<()> {
        self.send(Command::Event(event))
    }

    pub fn add_path(&self, addr: SocketAddr) -> Result<()> {
        self.send(Command::AddPath(addr))
    }

    pub fn remove_path(&self, addr: SocketAddr) -> Result<()> {
        self.send(Command::RemovePath(addr))
    }

    pub fn connection_up(&self) -> Result<()> {
        self.send(Command::ConnectionUp)
    }

    /// Ask the association to look for probing work, such as after the
    /// transport regained capacity.
    pub fn wake(&self) -> Result<()> {
        self.send(Command::Wake)
    }

    /// Stop the association thread.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// The state of the association as of its last processed input.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sender.send(command).map_err(|_| Error::SessionClosed)
    }
}

fn run<T, C, F>(
    mut association: Association<T, C, F>,
    receiver: &Receiver<Command>,
    snapshot: &RwLock<Snapshot>,
) -> Result<()>
where
    T: ProbeTransport,
    C: CongestionAdapter,
    F: FnMut(&Notification),
{
    let id = association.id();
    loop {
        association.poll(Instant::now())?;
        *snapshot.write() = association.snapshot();
        let received = match association.next_deadline() {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };
        let now = Instant::now();
        let result = match received {
            Command::Event(event) => {
                association.post(event);
                Ok(())
            }
            Command::AddPath(addr) => association.add_path(addr, now),
            Command::RemovePath(addr) => association.remove_path(addr),
            Command::ConnectionUp => association.connection_up(now),
            Command::Wake => Ok(()),
            Command::Shutdown => break,
        };
        match result {
            Ok(()) => {}
            Err(
                err @ (Error::UnknownPath(_)
                | Error::DuplicatePath(_)
                | Error::NoPaths
                | Error::AlreadyUp),
            ) => tracing::warn!(%id, %err, "command rejected"),
            Err(err) => return Err(err),
        }
    }
    tracing::debug!(%id, "association stopped");
    Ok(())
}
