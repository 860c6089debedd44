//! Backend sessions
//!
//! `Connection` owns one session handle. Opening runs on the bridge's executor; every
//! other operation is synchronous. The invocation lock serializes native calls that use
//! the session: invokes, and the close that may race with them.

use super::continuation::Continuation;
use super::function::{Function, FunctionDescriptor};
use crate::bridge::BridgeInner;
use crate::errors::{ErrorGroup, ErrorInfo, ReturnCode, RfcError, Result};
use crate::ffi::SessionHandle;
use crate::performance::DescriptorKey;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) struct ConnectionState {
    pub(crate) bridge: Arc<BridgeInner>,
    pub(crate) session: RwLock<Option<SessionHandle>>,
    pub(crate) invoke_lock: Mutex<()>,
    params: RwLock<Vec<(String, String)>>,
    opening: AtomicBool,
    /// Bumped by every close; an open started under an older value is cancelled
    generation: AtomicU64,
    last_error: Mutex<Option<ErrorInfo>>,
}

/// Clears the opening flag however the open job ends, including never running
struct OpeningGuard(Arc<ConnectionState>);

impl Drop for OpeningGuard {
    fn drop(&mut self) {
        self.0.opening.store(false, Ordering::Release);
    }
}

/// Payload of an open job; the flag is cleared before an abandoned continuation fires
struct PendingOpen {
    guard: OpeningGuard,
    continuation: Continuation<Option<RfcError>>,
}

impl ConnectionState {
    pub(crate) fn record_error(&self, info: &ErrorInfo) {
        *self.last_error.lock() = Some(info.clone());
    }

    /// Error describing why the session is unusable, as precise as the backend allows
    pub(crate) fn invalid_session_error(&self, session: Option<SessionHandle>) -> ErrorInfo {
        let lib = &self.bridge.lib;
        let queried = session.map(|h| {
            self.bridge
                .sink
                .api_call("RfcIsConnectionHandleValid", &[], lib.is_connection_handle_valid(h))
        });
        match queried {
            Some(Err(info)) => info,
            _ => ErrorInfo::invalid_handle("connection is not open"),
        }
    }

    fn open_blocking(&self, generation: u64) -> std::result::Result<(), ErrorInfo> {
        let lib = &self.bridge.lib;
        let sink = &self.bridge.sink;
        let params = self.params.read().clone();

        let handle = sink.api_call("RfcOpenConnection", &[], lib.open_connection(&params))?;
        match sink.api_call("RfcIsConnectionHandleValid", &[], lib.is_connection_handle_valid(handle)) {
            Ok(true) => {
                let mut session = self.session.write();
                if self.generation.load(Ordering::Acquire) != generation {
                    drop(session);
                    let _ = sink.api_call("RfcCloseConnection", &[], lib.close_connection(handle));
                    return Err(ErrorInfo::new(ReturnCode::Canceled, "connection was closed while opening")
                        .with_group(ErrorGroup::ExternalRuntimeFailure));
                }
                *session = Some(handle);
                drop(session);
                self.bridge.mark_opened();
                self.bridge.stats.record_open();
                Ok(())
            }
            outcome => {
                let _ = sink.api_call("RfcCloseConnection", &[], lib.close_connection(handle));
                Err(match outcome {
                    Err(info) => info,
                    _ => ErrorInfo::invalid_handle("backend returned an invalid connection handle"),
                })
            }
        }
    }

    fn close(&self) -> Result<bool> {
        let _guard = self.invoke_lock.lock();
        let taken = {
            let mut session = self.session.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            session.take()
        };
        let Some(handle) = taken else {
            return Ok(true);
        };
        let lib = &self.bridge.lib;
        match self
            .bridge
            .sink
            .api_call("RfcCloseConnection", &[], lib.close_connection(handle))
        {
            Ok(()) => Ok(true),
            Err(info) => {
                self.record_error(&info);
                Err(RfcError::Native(info))
            }
        }
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        if let Some(handle) = self.session.get_mut().take() {
            let lib = &self.bridge.lib;
            if let Err(info) = self
                .bridge
                .sink
                .api_call("RfcCloseConnection", &[], lib.close_connection(handle))
            {
                tracing::warn!(error = %info, "closing dropped connection failed");
            }
        }
    }
}

/// One backend session
pub struct Connection {
    state: Arc<ConnectionState>,
}

impl Connection {
    pub(crate) fn new(bridge: Arc<BridgeInner>) -> Self {
        Self {
            state: Arc::new(ConnectionState {
                bridge,
                session: RwLock::new(None),
                invoke_lock: Mutex::new(()),
                params: RwLock::new(Vec::new()),
                opening: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Open a session with the given login parameters
    ///
    /// Returns an argument error synchronously when `params` is empty or the connection
    /// is already open or opening. Otherwise the native open runs on the executor and
    /// `callback` fires exactly once, with `None` on success.
    pub fn open<I, K, V, F>(&self, params: I, callback: F) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        F: FnOnce(Option<RfcError>) + Send + 'static,
    {
        let params: Vec<(String, String)> = params.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if params.is_empty() {
            return Err(RfcError::argument("connection parameters must not be empty"));
        }
        if self.state.session.read().is_some() {
            return Err(RfcError::argument("connection is already open"));
        }
        if self.state.opening.swap(true, Ordering::AcqRel) {
            return Err(RfcError::argument("connection is already being opened"));
        }
        *self.state.params.write() = params;
        let generation = self.state.generation.load(Ordering::Acquire);

        let pending = PendingOpen {
            guard: OpeningGuard(self.state.clone()),
            continuation: Continuation::new(
                "open",
                self.state.bridge.sink.clone(),
                || Some(RfcError::fatal("open abandoned before completion")),
                callback,
            ),
        };
        self.state.bridge.executor.spawn(move || {
            let PendingOpen { guard, continuation } = pending;
            let state = &guard.0;
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| state.open_blocking(generation)));
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(info)) => {
                    state.record_error(&info);
                    Some(RfcError::Native(info))
                }
                Err(panic) => Some(RfcError::fatal(format!(
                    "native open panicked: {}",
                    super::continuation::panic_message(panic.as_ref())
                ))),
            };
            drop(guard);
            continuation.fire(error);
        });
        Ok(())
    }

    /// `open` as a future
    pub async fn open_async<I, K, V>(&self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (tx, rx) = oneshot::channel();
        self.open(params, move |err| {
            let _ = tx.send(err);
        })?;
        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(RfcError::fatal("open completed without reporting")),
        }
    }

    /// Close the session; idempotent
    ///
    /// Local state is cleared even when the native close fails; that failure is
    /// still returned.
    pub fn close(&self) -> Result<bool> {
        self.state.close()
    }

    /// Whether the backend still considers the session valid
    pub fn is_open(&self) -> bool {
        let Some(handle) = *self.state.session.read() else {
            return false;
        };
        let lib = &self.state.bridge.lib;
        matches!(
            self.state
                .bridge
                .sink
                .api_call("RfcIsConnectionHandleValid", &[], lib.is_connection_handle_valid(handle)),
            Ok(true)
        )
    }

    /// Round trip to the backend
    pub fn ping(&self) -> Result<bool> {
        let session = *self.state.session.read();
        let Some(handle) = session else {
            return Err(RfcError::Native(ErrorInfo::invalid_handle("connection is not open")));
        };
        let lib = &self.state.bridge.lib;
        match self.state.bridge.sink.api_call("RfcPing", &[], lib.ping(handle)) {
            Ok(()) => Ok(true),
            Err(info) => {
                self.state.record_error(&info);
                Err(RfcError::Native(info))
            }
        }
    }

    /// Resolve a function module on this connection
    pub fn lookup(&self, name: &str) -> Result<Function> {
        if name.is_empty() {
            return Err(RfcError::argument("function name must not be empty"));
        }
        let state = &self.state;
        let session = *state.session.read();
        let handle = match session {
            Some(handle) if self.is_open() => handle,
            _ => {
                let info = state.invalid_session_error(session);
                state.record_error(&info);
                return Err(RfcError::Native(info));
            }
        };

        let bridge = &state.bridge;
        let key = DescriptorKey::new(DescriptorKey::system_id(&state.params.read()), name);
        if let Some(descriptor) = bridge.cache.get(&key) {
            bridge.stats.record_lookup(true);
            return Ok(Function::new(Arc::downgrade(&self.state), bridge.clone(), descriptor));
        }

        let descriptor = match FunctionDescriptor::resolve(bridge, handle, name) {
            Ok(descriptor) => Arc::new(descriptor),
            Err(info) => {
                state.record_error(&info);
                return Err(RfcError::Native(info));
            }
        };
        bridge.stats.record_lookup(false);
        bridge.cache.insert(key, descriptor.clone());
        Ok(Function::new(Arc::downgrade(&self.state), bridge.clone(), descriptor))
    }

    /// Directory of the backend's ini file; process-wide, effective for later opens
    pub fn set_ini_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.state.bridge.set_ini_path(path.as_ref())
    }

    /// `[major, minor, patch]` of the native library
    pub fn get_version(&self) -> [u32; 3] {
        let (major, minor, patch) = self.state.bridge.lib.version();
        [major, minor, patch]
    }

    /// Session handle while open
    pub fn handle(&self) -> Option<SessionHandle> {
        *self.state.session.read()
    }

    /// Last error reported by the backend on this connection
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.state.last_error.lock().clone()
    }

    pub fn parameters(&self) -> Vec<(String, String)> {
        self.state.params.read().clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("session", &self.handle()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, ReturnCode};
    use crate::ffi::MockLibrary;
    use crate::frontend::BridgeConfig;
    use crate::Bridge;
    use std::sync::mpsc;
    use std::time::Duration;

    fn login() -> Vec<(&'static str, &'static str)> {
        vec![("user", "u"), ("passwd", "p"), ("ashost", "h"), ("sysnr", "00"), ("client", "001")]
    }

    fn open(conn: &Connection) -> Option<RfcError> {
        let (tx, rx) = mpsc::channel();
        conn.open(login(), move |err| tx.send(err).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn setup() -> (Arc<MockLibrary>, Bridge) {
        let lib = Arc::new(MockLibrary::new());
        let bridge = Bridge::new(lib.clone(), BridgeConfig::default().with_workers(2)).unwrap();
        (lib, bridge)
    }

    #[test]
    fn test_open_close_cycle() {
        let (lib, bridge) = setup();
        let conn = bridge.connection();
        assert!(!conn.is_open());
        assert!(open(&conn).is_none());
        assert!(conn.is_open());
        assert!(conn.ping().unwrap());

        assert!(conn.close().unwrap());
        assert!(!conn.is_open());
        assert!(conn.close().unwrap());
        assert_eq!(lib.session_count(), 0);
    }

    #[test]
    fn test_argument_errors_are_synchronous() {
        let (_lib, bridge) = setup();
        let conn = bridge.connection();
        let empty: Vec<(String, String)> = Vec::new();
        let err = conn.open(empty, |_| panic!("must not fire")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        assert!(open(&conn).is_none());
        let err = conn.open(login(), |_| panic!("must not fire")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn test_rejected_logon() {
        let (lib, bridge) = setup();
        lib.reject_logon(
            ErrorInfo::new(ReturnCode::LogonFailure, "Name or password is incorrect")
                .with_group(crate::errors::ErrorGroup::LogonFailure),
        );
        let conn = bridge.connection();
        let err = open(&conn).unwrap();
        assert_eq!(err.code(), Some(ReturnCode::LogonFailure));
        assert!(!conn.is_open());
        assert_eq!(conn.last_error().unwrap().message, "Name or password is incorrect");

        lib.accept_logon();
        assert!(open(&conn).is_none());
    }

    #[test]
    fn test_failed_native_close_still_clears_state() {
        let (lib, bridge) = setup();
        let conn = bridge.connection();
        assert!(open(&conn).is_none());
        lib.fail_close(ErrorInfo::new(ReturnCode::CommunicationFailure, "connection reset"));

        let err = conn.close().unwrap_err();
        assert_eq!(err.code(), Some(ReturnCode::CommunicationFailure));
        assert!(!conn.is_open());
        assert!(conn.close().unwrap());
    }

    #[test]
    fn test_lookup_requires_open_session() {
        let (lib, bridge) = setup();
        let conn = bridge.connection();
        let err = conn.lookup("STFC_CONNECTION").unwrap_err();
        assert_eq!(err.code(), Some(ReturnCode::InvalidHandle));

        assert!(open(&conn).is_none());
        lib.invalidate_all_sessions();
        let err = conn.lookup("STFC_CONNECTION").unwrap_err();
        assert_eq!(err.code(), Some(ReturnCode::InvalidHandle));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_lookup_uses_descriptor_cache() {
        let (lib, bridge) = setup();
        let first = bridge.connection();
        let second = bridge.connection();
        assert!(open(&first).is_none());
        assert!(open(&second).is_none());

        first.lookup("STFC_CONNECTION").unwrap();
        second.lookup("STFC_CONNECTION").unwrap();
        assert_eq!(lib.desc_lookup_count(), 1);
        assert_eq!(bridge.stats().descriptor_cache_hits, 1);

        let err = first.lookup("Z_DOES_NOT_EXIST").unwrap_err();
        assert_eq!(err.info().unwrap().key, "FU_NOT_FOUND");
    }

    #[test]
    fn test_drop_closes_session() {
        let (lib, bridge) = setup();
        let conn = bridge.connection();
        assert!(open(&conn).is_none());
        assert_eq!(lib.session_count(), 1);
        drop(conn);
        assert_eq!(lib.session_count(), 0);
    }

    #[test]
    fn test_version() {
        let (_lib, bridge) = setup();
        assert_eq!(bridge.connection().get_version(), [7, 500, 11]);
    }

    #[tokio::test]
    async fn test_open_async() {
        let lib = Arc::new(MockLibrary::new());
        let bridge = Bridge::new(lib, BridgeConfig::default()).unwrap();
        let conn = bridge.connection();
        conn.open_async(login()).await.unwrap();
        assert!(conn.is_open());
        assert!(conn.open_async(login()).await.is_err());
    }
}
