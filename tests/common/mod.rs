// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared fixtures: an in-process SSH jump host that forwards `direct-tcpip`
//! channels, a small HTTP backend, and helpers to drive the proxy.

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::header::HeaderMap;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use russh::server::{Auth, Msg, Session};
use russh::Channel;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use http_over_ssh::config::SshSettings;
use http_over_ssh::proxy::ProxyServer;
use http_over_ssh::ssh::auth::load_key;
use http_over_ssh::ssh::tokio_client::AuthMethod;
use http_over_ssh::ssh::ConnectionPool;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Client settings authenticating with the fixture key and accepting any
/// host key.
pub fn settings() -> SshSettings {
    let key = load_key(&fixture_path("id_ed25519")).unwrap();
    SshSettings::new("prometheus", vec![AuthMethod::with_key(key)])
        .with_connect_timeout(Duration::from_secs(1))
}

/// A local port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// SSH server accepting every public key and forwarding `direct-tcpip`
/// channels to the requested address.
pub struct SshJumpHost {
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
    refuse_next: RefuseHook,
}

type RefuseHook = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

impl SshJumpHost {
    pub async fn start() -> Self {
        let host_key = russh::keys::load_secret_key(fixture_path("id_ed25519"), None).unwrap();
        let config = Arc::new(russh::server::Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_millis(0),
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let refuse_next: RefuseHook = Arc::new(Mutex::new(None));

        let tracked = Arc::clone(&sessions);
        let hook = Arc::clone(&refuse_next);
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let config = Arc::clone(&config);
                let handler = JumpHandler {
                    refuse_next: Arc::clone(&hook),
                };
                let session = tokio::spawn(async move {
                    match russh::server::run_stream(config, socket, handler).await {
                        Ok(running) => {
                            let _ = running.await;
                        }
                        Err(e) => eprintln!("SSH handshake failed: {e}"),
                    }
                });
                tracked.lock().unwrap().push(session);
            }
        });

        Self {
            addr,
            accept_task,
            sessions,
            refuse_next,
        }
    }

    /// Refuse the next `direct-tcpip` request, running `hook` before the
    /// refusal is sent.
    pub fn refuse_next_channel(&self, hook: impl FnOnce() + Send + 'static) {
        *self.refuse_next.lock().unwrap() = Some(Box::new(hook));
    }

    /// Authority form used in proxy request targets.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Tear down every open SSH session; the listener keeps accepting.
    pub fn drop_sessions(&self) {
        for session in self.sessions.lock().unwrap().drain(..) {
            session.abort();
        }
    }
}

impl Drop for SshJumpHost {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_sessions();
    }
}

struct JumpHandler {
    refuse_next: RefuseHook,
}

impl russh::server::Handler for JumpHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let hook = self.refuse_next.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
            return Ok(false);
        }

        let port = u16::try_from(port_to_connect)?;
        match TcpStream::connect((host_to_connect, port)).await {
            Ok(mut backend) => {
                tokio::spawn(async move {
                    let mut stream = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut backend).await;
                });
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

/// HTTP backend answering `Hello World` and recording the request headers.
pub struct HttpBackend {
    pub addr: SocketAddr,
    last_headers: Arc<Mutex<Option<HeaderMap>>>,
    accept_task: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let last_headers = Arc::new(Mutex::new(None));
        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&last_headers);
        let tracked = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = Arc::clone(&recorded);
                let conn = tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = Arc::clone(&recorded);
                        async move {
                            *recorded.lock().unwrap() = Some(req.headers().clone());
                            let response = if req.uri().path() == "/test" {
                                Response::new(Full::new(Bytes::from_static(b"Hello World")))
                            } else {
                                let mut response = Response::new(Full::new(Bytes::new()));
                                *response.status_mut() = StatusCode::NOT_FOUND;
                                response
                            };
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
                tracked.lock().unwrap().push(conn);
            }
        });

        Self {
            addr,
            last_headers,
            accept_task,
            connections,
        }
    }

    pub fn last_host(&self) -> Option<String> {
        self.last_header(hyper::header::HOST.as_str())
    }

    /// Value of `name` in the most recent request.
    pub fn last_header(&self, name: &str) -> Option<String> {
        self.last_headers
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|headers| headers.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        for conn in self.connections.lock().unwrap().drain(..) {
            conn.abort();
        }
    }
}

impl Drop for HttpBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a proxy server for `pool` on an ephemeral port.
pub async fn start_proxy(pool: Arc<ConnectionPool>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(ProxyServer::new(pool).unwrap());
    tokio::spawn(server.run_on_listener(listener, std::future::pending()));
    addr
}

/// Send one GET with the given request target to the proxy over a fresh
/// connection. Returns status and body.
pub async fn proxy_get(
    proxy: SocketAddr,
    target: &str,
    authorization: Option<&str>,
) -> (StatusCode, String) {
    match authorization {
        Some(auth) => proxy_get_with(proxy, target, &[("authorization", auth)]).await,
        None => proxy_get_with(proxy, target, &[]).await,
    }
}

/// Like [`proxy_get`], with arbitrary extra request headers.
pub async fn proxy_get_with(
    proxy: SocketAddr,
    target: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, String) {
    let stream = TcpStream::connect(proxy).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let uri: hyper::Uri = target.parse().unwrap();
    let host = uri
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_else(|| proxy.to_string());
    let mut builder = Request::get(uri).header(hyper::header::HOST, host);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Empty::<Bytes>::new()).unwrap();

    let response = sender.send_request(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// Write `request` verbatim to the proxy and return everything it sends
/// back before closing the connection.
pub async fn proxy_raw(proxy: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Wait until `check` holds, failing the test after a few seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

/// TCP relay in front of an upstream address whose client-to-upstream
/// direction can be frozen: sockets stay open, bytes stop flowing.
pub struct TcpRelay {
    pub addr: SocketAddr,
    controls: RelayControls,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Cloneable handle to freeze or close a [`TcpRelay`] from another task.
#[derive(Clone)]
pub struct RelayControls {
    frozen: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RelayControls {
    /// Stop forwarding client bytes on every connection open right now.
    /// Later connections are unaffected.
    pub fn freeze_outbound(&self) {
        for flag in self.frozen.lock().unwrap().iter() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Close the listener; new connections are refused.
    pub fn stop_accepting(&self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl TcpRelay {
    pub async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frozen: Arc<Mutex<Vec<Arc<AtomicBool>>>> = Arc::new(Mutex::new(Vec::new()));
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let flags = Arc::clone(&frozen);
        let tracked = Arc::clone(&tasks);
        let accept_task = tokio::spawn(async move {
            while let Ok((inbound, _)) = listener.accept().await {
                let Ok(outbound) = TcpStream::connect(upstream).await else {
                    continue;
                };
                let flag = Arc::new(AtomicBool::new(false));
                flags.lock().unwrap().push(Arc::clone(&flag));

                let (client_read, client_write) = inbound.into_split();
                let (upstream_read, upstream_write) = outbound.into_split();
                let mut tracked = tracked.lock().unwrap();
                tracked.push(tokio::spawn(pump(client_read, upstream_write, Some(flag))));
                tracked.push(tokio::spawn(pump(upstream_read, client_write, None)));
            }
        });

        Self {
            addr,
            controls: RelayControls {
                frozen,
                accept_task: Arc::new(Mutex::new(Some(accept_task))),
            },
            tasks,
        }
    }

    pub fn controls(&self) -> RelayControls {
        self.controls.clone()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for TcpRelay {
    fn drop(&mut self) {
        self.controls.stop_accepting();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn pump<R, W>(mut from: R, mut to: W, frozen: Option<Arc<AtomicBool>>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        while frozen.as_ref().is_some_and(|f| f.load(Ordering::SeqCst)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if to.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}
