//! Client side of the registration feed.  Keeps the management interface in step with the
//! slices registered here: every update is queued, and after the feed has been down the whole
//! current state is sent again before anything newer.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::management_interface::Command;
use crate::slice_registry::SliceConfiguration;

/// How feed messages reach the management interface.
pub trait FeedTransport: Send {
    /// Liveness probe.
    fn probe(&mut self) -> io::Result<()>;
    /// Delivers one command line.
    fn send(&mut self, line: &str) -> io::Result<()>;
}

/// One short-lived TCP connection per message.
pub struct TcpFeed {
    addr: String,
    timeout: Duration,
}

impl TcpFeed {
    pub fn new(addr: &str, timeout: Duration) -> TcpFeed {
        TcpFeed {
            addr: addr.to_string(),
            timeout,
        }
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", self.addr))
        })
    }
}

impl FeedTransport for TcpFeed {
    fn probe(&mut self) -> io::Result<()> {
        self.send(&Command::Ping.to_line())
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        let mut stream = TcpStream::connect_timeout(&self.resolve()?, self.timeout)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(line.as_bytes())?;
        stream.flush()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct QueueEntry {
    slice_id: String,
    line: String,
    register: bool,
}

impl QueueEntry {
    fn register(config: &SliceConfiguration) -> QueueEntry {
        QueueEntry {
            slice_id: config.slice_id.clone(),
            line: Command::Register(config.clone()).to_line(),
            register: true,
        }
    }

    fn unregister(slice_id: &str) -> QueueEntry {
        QueueEntry {
            slice_id: slice_id.to_string(),
            line: Command::Unregister(slice_id.to_string()).to_line(),
            register: false,
        }
    }
}

struct Feed<T> {
    transport: T,
    state: FeedState,
    pending: VecDeque<QueueEntry>,
    configs_by_slice: BTreeMap<String, SliceConfiguration>,
}

impl<T: FeedTransport> Feed<T> {
    /// Replaces everything queued with a register for every known slice, followed by the
    /// unregisters that were still waiting.
    fn requeue_all(&mut self) {
        let unregisters: Vec<QueueEntry> = self.pending.drain(..).filter(|e| !e.register).collect();
        self.pending = self
            .configs_by_slice
            .values()
            .map(QueueEntry::register)
            .chain(unregisters)
            .collect();
    }

    fn disconnected(&mut self, reason: &io::Error) {
        if self.state == FeedState::Connected {
            info!(error = %reason, "registration feed disconnected, requeueing all slices");
            self.state = FeedState::Disconnected;
            self.requeue_all();
        }
    }

    fn drain(&mut self) {
        while let Some(entry) = self.pending.front() {
            match self.transport.send(&entry.line) {
                Ok(()) => {
                    debug!(slice = %entry.slice_id, register = entry.register, "sent to management interface");
                    self.pending.pop_front();
                }
                Err(e) => {
                    self.disconnected(&e);
                    return;
                }
            }
        }
    }
}

pub struct ClientInterface<T> {
    feed: Mutex<Feed<T>>,
    running: AtomicBool,
    interval: Duration,
}

impl<T: FeedTransport + 'static> ClientInterface<T> {
    pub fn new(transport: T, interval: Duration) -> ClientInterface<T> {
        ClientInterface {
            feed: Mutex::new(Feed {
                transport,
                state: FeedState::Disconnected,
                pending: VecDeque::new(),
                configs_by_slice: BTreeMap::new(),
            }),
            running: AtomicBool::new(false),
            interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Feed<T>> {
        self.feed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, config: SliceConfiguration) {
        let mut feed = self.lock();
        feed.pending.push_back(QueueEntry::register(&config));
        feed.configs_by_slice.insert(config.slice_id.clone(), config);
    }

    /// Queues an unregister, dropping anything still queued for the slice.
    pub fn unregister(&self, slice_id: &str) {
        let mut feed = self.lock();
        feed.pending.retain(|e| e.slice_id != slice_id);
        feed.pending.push_back(QueueEntry::unregister(slice_id));
        feed.configs_by_slice.remove(slice_id);
    }

    pub fn state(&self) -> FeedState {
        self.lock().state
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// One probe, and if the feed is up, send everything queued.
    pub fn tick(&self) {
        let mut feed = self.lock();
        match feed.transport.probe() {
            Ok(()) => {
                if feed.state == FeedState::Disconnected {
                    info!("registration feed connected");
                    feed.state = FeedState::Connected;
                }
                feed.drain();
            }
            Err(e) => feed.disconnected(&e),
        }
    }

    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        thread::Builder::new()
            .name("registration-feed".to_string())
            .spawn(move || {
                while this.running.load(Ordering::SeqCst) {
                    this.tick();
                    thread::sleep(this.interval);
                }
            })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice_registry::VlanConfiguration;
    use tracing_test::traced_test;

    /// Records sent lines; `up` decides whether probes and sends succeed.
    #[derive(Clone, Default)]
    struct FakeFeed {
        up: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<String>>>,
        /// Number of sends to accept before failing, if set.
        budget: Arc<Mutex<Option<usize>>>,
    }

    impl FakeFeed {
        fn fail() -> io::Error {
            io::Error::new(io::ErrorKind::ConnectionRefused, "down")
        }

        fn lines(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl FeedTransport for FakeFeed {
        fn probe(&mut self) -> io::Result<()> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(FakeFeed::fail())
            }
        }

        fn send(&mut self, line: &str) -> io::Result<()> {
            self.probe()?;
            let mut budget = self.budget.lock().unwrap();
            match *budget {
                Some(0) => return Err(FakeFeed::fail()),
                Some(ref mut n) => *n -= 1,
                None => (),
            }
            self.sent.lock().unwrap().push(line.trim_end().to_string());
            Ok(())
        }
    }

    fn slice(id: &str, vlan: u16) -> SliceConfiguration {
        SliceConfiguration::new(
            id,
            vec![VlanConfiguration {
                vlan_tag: vlan,
                controller_url: None,
            }],
        )
    }

    fn client() -> (ClientInterface<FakeFeed>, FakeFeed) {
        let fake = FakeFeed::default();
        (ClientInterface::new(fake.clone(), Duration::from_millis(10)), fake)
    }

    #[test]
    fn queues_while_disconnected_and_drains_on_connect() {
        let (client, fake) = client();
        client.register(slice("a", 1));
        client.tick();
        assert_eq!(client.state(), FeedState::Disconnected);
        assert_eq!(client.pending(), 1);

        fake.up.store(true, Ordering::SeqCst);
        client.tick();
        assert_eq!(client.state(), FeedState::Connected);
        assert_eq!(client.pending(), 0);
        assert_eq!(fake.lines().len(), 1);
        assert!(fake.lines()[0].starts_with("register {\"slice_id\":\"a\""));
    }

    #[test]
    fn unregister_supersedes_queued_messages() {
        let (client, fake) = client();
        client.register(slice("a", 1));
        client.register(slice("b", 2));
        client.register(slice("a", 3));
        client.unregister("a");
        fake.up.store(true, Ordering::SeqCst);
        client.tick();
        let lines = fake.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("register {\"slice_id\":\"b\""));
        assert_eq!(lines[1], "unregister a");
    }

    #[test]
    #[traced_test]
    fn reconnect_replays_every_slice_once_before_new_messages() {
        let (client, fake) = client();
        fake.up.store(true, Ordering::SeqCst);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            client.register(slice(id, i as u16 + 1));
        }
        client.tick();
        assert_eq!(fake.lines().len(), 3);

        // two more updates are in flight when the feed goes down
        client.register(slice("d", 4));
        client.register(slice("a", 5));
        fake.up.store(false, Ordering::SeqCst);
        client.tick();
        assert_eq!(client.state(), FeedState::Disconnected);
        assert!(logs_contain("registration feed disconnected"));
        client.register(slice("e", 6));

        fake.sent.lock().unwrap().clear();
        fake.up.store(true, Ordering::SeqCst);
        client.tick();
        let lines = fake.lines();
        assert_eq!(lines.len(), 5);
        let replayed: Vec<&str> = lines[..4]
            .iter()
            .map(|l| l.split('"').nth(3).unwrap())
            .collect();
        assert_eq!(replayed, ["a", "b", "c", "d"]);
        assert!(lines[0].contains("\"vlan_tag\":5"));
        assert!(lines[4].contains("\"slice_id\":\"e\""));
    }

    #[test]
    fn send_failure_keeps_message_queued() {
        let (client, fake) = client();
        fake.up.store(true, Ordering::SeqCst);
        *fake.budget.lock().unwrap() = Some(1);
        client.register(slice("a", 1));
        client.register(slice("b", 2));
        client.tick();
        assert_eq!(client.state(), FeedState::Disconnected);
        assert_eq!(fake.lines().len(), 1);
        // both slices are replayed once the feed is back
        assert_eq!(client.pending(), 2);

        *fake.budget.lock().unwrap() = None;
        client.tick();
        assert_eq!(client.pending(), 0);
        assert_eq!(fake.lines().len(), 3);
    }
}
