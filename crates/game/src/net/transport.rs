use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use super::protocol::{MAX_PACKET_SIZE, Message};

/// UDP endpoint with a dedicated receive thread.
///
/// The thread blocks on `recv_from`, decodes datagrams, and pushes them onto
/// a channel. Nothing else runs on that thread; the owner drains the channel
/// once per tick and dispatches from there. Malformed or wrong-protocol
/// datagrams are dropped where they land.
pub struct Transport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    inbox: Receiver<(Message, SocketAddr)>,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();

        let receiver = spawn_receiver(socket.try_clone()?, tx, Arc::clone(&running))?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            inbox: rx,
            running,
            receiver: Some(receiver),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn send_to(&self, message: &Message, addr: SocketAddr) -> io::Result<usize> {
        let data = message.serialize().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("encode error: {}", e))
        })?;

        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "message exceeds MTU",
            ));
        }

        self.socket.send_to(&data, addr)
    }

    pub fn send(&self, message: &Message) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_to(message, addr)
    }

    /// Drains everything the receive thread has queued since the last call.
    /// Never blocks.
    pub fn drain(&mut self) -> Vec<(Message, SocketAddr)> {
        let mut messages = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(item) => messages.push(item),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stops the receive thread. Messages still queued are discarded.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Wake the blocking recv_from so the thread observes the flag.
        let _ = self.socket.send_to(&[], self.local_addr);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.shutdown();
        }
    }
}

fn spawn_receiver(
    socket: UdpSocket,
    tx: Sender<(Message, SocketAddr)>,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("duet-recv".to_owned())
        .spawn(move || {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buffer) {
                    Ok((size, addr)) => {
                        if size == 0 {
                            continue;
                        }
                        match Message::deserialize(&buffer[..size]) {
                            Ok(message) if message.header.is_valid() => {
                                if tx.send((message, addr)).is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {
                                log::debug!("dropping datagram with bad header from {}", addr);
                            }
                            Err(e) => {
                                log::debug!("dropping undecodable datagram from {}: {}", addr, e);
                            }
                        }
                    }
                    // A send to an unreachable peer surfaces here on some
                    // platforms; the socket is still usable.
                    Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            log::error!("receive thread terminating: {}", e);
                        }
                        break;
                    }
                }
            }
        })
}
