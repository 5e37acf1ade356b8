//! Example: TCP echo server wiring the reactor, the worker pool and the scheduler
//!
//! The reactor accepts connections and reads requests, the pool turns each
//! request into a reply and queues it on the connection, and the reactor's
//! write notification flushes the queue. Connections idle for too long are
//! closed by the scheduler.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use treadle::{Interest, Reactor, Scheduler, TimerId, WorkerPool};

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// A client socket and the reply bytes it has not accepted yet.
struct Peer {
    stream: TcpStream,
    outbox: Mutex<Vec<u8>>,
}

struct Connection {
    peer: Arc<Peer>,
    idle: Option<TimerId>,
}

#[derive(Clone)]
struct Server {
    reactor: Arc<Reactor>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
    connections: Arc<Mutex<HashMap<RawFd, Connection>>>,
}

impl Server {
    fn accept(&self, listener: &TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.open(stream) {
                        eprintln!("rejecting {peer}: {err}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    eprintln!("accept failed: {e}");
                    return;
                }
            }
        }
    }

    fn open(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(true)?;

        let fd = stream.as_raw_fd();
        let peer = Arc::new(Peer {
            stream,
            outbox: Mutex::new(Vec::new()),
        });

        self.connections.lock().insert(
            fd,
            Connection {
                peer: peer.clone(),
                idle: None,
            },
        );
        self.touch(fd);

        let reader = self.clone();
        let reading = peer.clone();
        let writer = self.clone();
        let added = self.reactor.add(fd, Interest::READ, move || {
            reader.on_readable(fd, &reading);
        }) && self.reactor.add(fd, Interest::WRITE, move || {
            writer.flush(fd, &peer);
        });

        if !added {
            self.close(fd);
            return Err(io::Error::other("reactor refused the connection"));
        }

        Ok(())
    }

    /// Runs on the driver thread.
    fn on_readable(&self, fd: RawFd, peer: &Arc<Peer>) {
        let mut buf = [0u8; 1024];

        loop {
            match (&peer.stream).read(&mut buf) {
                Ok(0) => {
                    self.close(fd);
                    return;
                }
                Ok(n) => {
                    self.touch(fd);
                    self.offload(fd, peer.clone(), buf[..n].to_vec());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(_) => {
                    self.close(fd);
                    return;
                }
            }
        }
    }

    /// Builds the reply on a worker and asks the reactor for a write
    /// notification to send it.
    fn offload(&self, fd: RawFd, peer: Arc<Peer>, request: Vec<u8>) {
        let reactor = self.reactor.clone();

        let job = move || {
            let reply = request.to_ascii_uppercase();

            peer.outbox.lock().extend_from_slice(&reply);
            // False once the connection is closed; the reply is dropped.
            reactor.request_write(fd);
        };

        if let Err(err) = self.pool.execute(job) {
            eprintln!("{err}");
        }
    }

    /// Runs on the driver thread when `fd` is writable.
    ///
    /// Writes as much of the outbox as the socket takes and re-arms the
    /// notification for the rest.
    fn flush(&self, fd: RawFd, peer: &Peer) {
        let mut outbox = peer.outbox.lock();

        while !outbox.is_empty() {
            match (&peer.stream).write(&outbox[..]) {
                Ok(0) => break,
                Ok(n) => {
                    outbox.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.reactor.request_write(fd);
                    return;
                }
                Err(err) => {
                    eprintln!("write failed: {err}");
                    break;
                }
            }
        }

        if !outbox.is_empty() {
            drop(outbox);
            self.close(fd);
        }
    }

    /// Restarts the idle timer of `fd`.
    fn touch(&self, fd: RawFd) {
        let server = self.clone();
        let timer = self.scheduler.schedule(IDLE_TIMEOUT, move || {
            let closer = server.clone();
            server
                .reactor
                .wake_up(Some(Box::new(move || closer.close(fd))));
        });

        let mut connections = self.connections.lock();
        match connections.get_mut(&fd) {
            Some(connection) => {
                if let Some(previous) = connection.idle.replace(timer) {
                    self.scheduler.cancel(previous);
                }
            }
            None => {
                self.scheduler.cancel(timer);
            }
        }
    }

    fn close(&self, fd: RawFd) {
        let Some(connection) = self.connections.lock().remove(&fd) else {
            return;
        };

        self.reactor.remove(fd, Interest::BOTH);
        if let Some(timer) = connection.idle {
            self.scheduler.cancel(timer);
        }
        let _ = connection.peer.stream.shutdown(Shutdown::Both);

        println!("closed connection {fd}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server {
        reactor: Arc::new(Reactor::new()?),
        pool: Arc::new(WorkerPool::new(4)),
        scheduler: Arc::new(Scheduler::new()),
        connections: Arc::new(Mutex::new(HashMap::new())),
    };

    let listener = Arc::new(TcpListener::bind("127.0.0.1:0")?);
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let acceptor = server.clone();
    let accepting = listener.clone();
    if !server
        .reactor
        .add(listener.as_raw_fd(), Interest::READ, move || {
            acceptor.accept(&accepting)
        })
    {
        return Err("failed to register the listener".into());
    }

    let reactor_thread = {
        let reactor = server.reactor.clone();
        thread::spawn(move || reactor.run())
    };
    let scheduler_thread = {
        let scheduler = server.scheduler.clone();
        thread::spawn(move || scheduler.run())
    };

    println!("echo server listening on {addr}");

    // Talk to ourselves.
    let mut client = TcpStream::connect(addr)?;
    client.set_read_timeout(Some(Duration::from_secs(5)))?;

    for message in ["hello", "treadle"] {
        client.write_all(message.as_bytes())?;

        let mut reply = vec![0u8; message.len()];
        client.read_exact(&mut reply)?;
        println!("{message} -> {}", String::from_utf8_lossy(&reply));
    }

    drop(client);
    thread::sleep(Duration::from_millis(50));

    server.reactor.stop();
    server.scheduler.stop();

    reactor_thread.join().map_err(|_| "reactor thread panicked")??;
    scheduler_thread
        .join()
        .map_err(|_| "scheduler thread panicked")?;

    Ok(())
}
