//! Blocking command session over a byte stream.
//!
//! The controller lives behind a mutex shared by two contexts:
//!
//! - a reader thread that feeds every received byte into
//!   [`FiuController::on_receive_byte`]
//! - the caller's thread, which submits commands and then ticks
//!   [`FiuController::process`] once per millisecond until the command
//!   resolves
//!
//! Neither touches controller state without holding the lock. A panic on
//! either side does not wedge the session: the lock is recovered from
//! poisoning, since every controller method leaves it consistent before
//! invoking user callbacks.

use {
    crate::{
        channel::ChannelMask,
        clock::SystemClock,
        error::{Error, Result},
        link::{
            completion::{Abandoned, Completion, completion},
            controller::{FiuController, LinkConfig},
            request::{CommandLink, Request},
        },
        protocol::{command::ConfigParams, frame::Payload},
        transport::Transport,
    },
    log::{debug, info, trace, warn},
    std::{
        io::{self, Read},
        sync::{
            Arc, Mutex, MutexGuard, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    },
};
#[cfg(feature = "native")]
use crate::transport::{SerialConfig, native::SerialTransport};

/// Session over a native serial port.
#[cfg(feature = "native")]
pub type SerialSession = Session<SerialTransport>;

/// Interval between `process()` ticks while a command is outstanding.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Read timeout of the serial receive handle, bounds shutdown latency.
#[cfg(feature = "native")]
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Open link with a background receive thread.
///
/// `T` must finish writing inside [`Transport::start_send`]; the session
/// reports transmit completion as soon as a submission is accepted.
pub struct Session<T: Transport + Send + 'static> {
    controller: Arc<Mutex<FiuController<T, SystemClock>>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
    port_name: String,
}

#[cfg(feature = "native")]
impl Session<SerialTransport> {
    /// Open `config.port_name` and start the receive thread.
    pub fn open(config: &SerialConfig, link: LinkConfig) -> Result<Self> {
        let config = config.clone().with_timeout(READ_TIMEOUT);
        let transport = SerialTransport::open(&config)?;
        let reader = transport.try_clone_reader()?;
        Self::start(transport, reader, config.port_name, link)
    }
}

impl<T: Transport + Send + 'static> Session<T> {
    /// Initialize a link over `transport` and read replies from `reader`.
    ///
    /// `reader` should return `TimedOut` (or `WouldBlock`) when idle so the
    /// receive thread notices shutdown.
    pub fn start<R>(
        transport: T,
        reader: R,
        port_name: impl Into<String>,
        link: LinkConfig,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let port_name = port_name.into();
        let mut controller = FiuController::with_config(transport, SystemClock, link);
        controller.init()?;
        let controller = Arc::new(Mutex::new(controller));

        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = {
            let controller = Arc::clone(&controller);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("fiulink-rx".into())
                .spawn(move || receive_loop(reader, &controller, &shutdown))?
        };

        info!("Session started on {port_name}");
        Ok(Self {
            controller,
            shutdown,
            reader: Some(reader),
            port_name,
        })
    }

    /// Port this session talks to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configure one channel and wait for its acknowledgment.
    pub fn set_config(&mut self, params: ConfigParams) -> Result<Payload> {
        self.execute(&Request::SetConfig(params))
    }

    /// Start synchronous output and wait for its acknowledgment.
    pub fn synchronous_op(&mut self, mask: Option<ChannelMask>) -> Result<Payload> {
        self.execute(&Request::Synchronous(mask))
    }

    /// Fire triggered output and wait for its acknowledgment.
    pub fn trigger_op(&mut self, mask: Option<ChannelMask>) -> Result<Payload> {
        self.execute(&Request::Trigger(mask))
    }

    /// Apply control output and wait for its acknowledgment.
    pub fn control_op(&mut self, mask: Option<ChannelMask>) -> Result<Payload> {
        self.execute(&Request::Control(mask))
    }

    /// Forget every tracked channel.
    pub fn clear_tracked_channels(&self) {
        lock_or_recover(&self.controller).clear_tracked_channels();
    }

    /// Stop the receive thread and close the port.
    pub fn close(mut self) {
        self.stop_reader();
    }

    fn stop_reader(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("Receive thread for {} panicked", self.port_name);
            }
        }
    }
}

impl<T: Transport + Send + 'static> CommandLink for Session<T> {
    fn execute(&mut self, request: &Request) -> Result<Payload> {
        let (callback, done) = completion();
        {
            let mut ctrl = lock_or_recover(&self.controller);
            if request.submit(&mut ctrl, callback) {
                ctrl.on_send_complete();
            } else {
                debug!("{request} not accepted");
            }
        }

        await_outcome(&done, || lock_or_recover(&self.controller).process())
    }

    fn tracked_channels(&self) -> ChannelMask {
        lock_or_recover(&self.controller).tracked_channels()
    }
}

impl<T: Transport + Send + 'static> Drop for Session<T> {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Wait on `done`, calling `tick` between polls.
///
/// A callback dropped without an outcome ends the wait with `SendFailed`.
fn await_outcome(done: &Completion, mut tick: impl FnMut()) -> Result<Payload> {
    loop {
        match done.wait_timeout(POLL_INTERVAL) {
            Ok(Some(outcome)) => return outcome.into_result(),
            Ok(None) => tick(),
            Err(Abandoned) => {
                warn!("Command callback dropped without an outcome");
                return Err(Error::SendFailed);
            },
        }
    }
}

fn receive_loop<T: Transport, R: Read>(
    mut port: R,
    controller: &Mutex<FiuController<T, SystemClock>>,
    shutdown: &AtomicBool,
) {
    let mut buf = [0u8; 64];
    while !shutdown.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                trace!("RX {:02X?}", &buf[..n]);
                let mut ctrl = lock_or_recover(controller);
                for &b in &buf[..n] {
                    ctrl.on_receive_byte(b);
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                warn!("Receive loop stopped: {e}");
                break;
            },
        }
    }
    debug!("Receive loop exited");
}

fn lock_or_recover<T>(controller: &Mutex<T>) -> MutexGuard<'_, T> {
    controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            protocol::{
                command::{OutputFault, WorkMode},
                frame::FRAME_LEN,
            },
            sim::{Peripheral, PeripheralFault},
            transport::SendSource,
        },
        std::collections::VecDeque,
    };

    /// Bytes travelling from the peripheral back to the host.
    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<VecDeque<u8>>>);

    /// Transport whose writes are answered by a simulated board.
    struct LoopbackTransport {
        board: Peripheral,
        wire: Wire,
    }

    impl Transport for LoopbackTransport {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_send_busy(&self) -> bool {
            false
        }

        fn start_send(&mut self, source: &mut dyn SendSource) -> bool {
            let mut buf = [0u8; FRAME_LEN];
            let Some(len) = source.pull_frame(&mut buf) else {
                return false;
            };
            if let Some(reply) = self.board.respond(&buf[..len]) {
                self.wire.0.lock().unwrap().extend(reply.as_bytes().iter().copied());
            }
            true
        }
    }

    struct WireReader(Wire);

    impl Read for WireReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = {
                let mut queue = self.0.0.lock().unwrap();
                let n = buf.len().min(queue.len());
                for (slot, b) in buf.iter_mut().zip(queue.drain(..n)) {
                    *slot = b;
                }
                n
            };
            if n == 0 {
                thread::sleep(Duration::from_millis(1));
                return Err(io::ErrorKind::TimedOut.into());
            }
            Ok(n)
        }
    }

    fn loopback(board: Peripheral, link: LinkConfig) -> Session<LoopbackTransport> {
        let wire = Wire::default();
        let transport = LoopbackTransport {
            board,
            wire: wire.clone(),
        };
        Session::start(transport, WireReader(wire), "loopback", link).unwrap()
    }

    #[test]
    fn test_echo_on_reader_thread_resolves() {
        let mut session = loopback(Peripheral::new(), LinkConfig::default());
        assert_eq!(session.port_name(), "loopback");

        let params = ConfigParams::new(3, OutputFault::LoadNoFault, WorkMode::Synchronous)
            .with_timing(100, 200)
            .with_cycles(5);
        let echoed = session.set_config(params).unwrap();
        assert_eq!(echoed, [0x03, 0x01, 0x02, 0x64, 0x00, 0xC8, 0x00, 0x05]);
        assert!(session.tracked_channels().is_set(3));

        let echoed = session.synchronous_op(None).unwrap();
        assert_eq!(echoed, [0x08, 0, 0, 0, 0, 0, 0, 0]);
        session.close();
    }

    #[test]
    fn test_silent_reader_times_out() {
        let link = LinkConfig::default().with_response_timeout(Duration::from_millis(20));
        let mut session = loopback(Peripheral::with_fault(PeripheralFault::Silent), link);

        let result = session.trigger_op(Some(ChannelMask::from_bits(1)));
        assert!(
            matches!(result, Err(Error::Timeout { elapsed_ms }) if elapsed_ms >= 20),
            "{result:?}"
        );

        // the link is usable again after the timeout
        let result = session.control_op(Some(ChannelMask::from_bits(1)));
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_rejected_request_returns_immediately() {
        let mut session = loopback(Peripheral::new(), LinkConfig::default());
        assert!(matches!(
            session.trigger_op(None),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let mut session = loopback(Peripheral::new(), LinkConfig::default());
        let controller = Arc::clone(&session.controller);
        let panicked = thread::spawn(move || {
            let _guard = controller.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(panicked.is_err());
        assert!(session.controller.is_poisoned());

        assert!(session.control_op(Some(ChannelMask::from_bits(2))).is_ok());
        session.clear_tracked_channels();
        assert!(session.tracked_channels().is_empty());
    }

    #[test]
    fn test_dropped_callback_ends_wait() {
        let (callback, done) = completion();
        let mut callback = Some(callback);
        let mut ticks = 0;

        let result = await_outcome(&done, || {
            ticks += 1;
            if ticks == 3 {
                drop(callback.take());
            }
        });
        assert!(matches!(result, Err(Error::SendFailed)));
        assert_eq!(ticks, 3);
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/fiulink-does-not-exist", 115_200);
        assert!(SerialSession::open(&config, LinkConfig::default()).is_err());
    }
}
