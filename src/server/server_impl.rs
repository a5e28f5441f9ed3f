use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        accept_queue::{AcceptQueue, AcceptedSocket},
        connection::{ConnectionData, HttpConnection},
        event::EventSink,
        shutdown::ShutdownCoordinator,
    },
    ConnectionFilter, Version,
};
use crossbeam::queue::SegQueue;
use std::{
    future::Future,
    marker::{PhantomData, Send, Sync},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use tokio::net::{TcpListener, TcpStream};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use mingoose::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use mingoose::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, req: &Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating whether the request was fully processed or
    /// requires further handling by other middleware.
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> impl Future<Output = Handled> + Send;
}

/// A cloneable, cheap-to-hold handle for requesting and awaiting graceful
/// shutdown of a running [`Server`].
///
/// Obtain one with [`Server::handle`] before calling [`Server::launch`] (which
/// consumes the server), store it wherever your signal handler lives, and
/// call [`stop`](Self::stop) when you want the server to wind down.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<ShutdownCoordinator>,
}

impl ServerHandle {
    /// Requests a graceful shutdown. The acceptor stops admitting new
    /// connections, in-flight connections are allowed to finish their
    /// current request, and idle workers exit once the queue drains.
    ///
    /// Returns immediately; await [`stopped`](Self::stopped) to block until
    /// shutdown has fully completed.
    #[inline]
    pub fn stop(&self) {
        self.shutdown.request_stop();
    }

    /// Resolves once every worker has exited and the server has reached its
    /// final stopped state.
    #[inline]
    pub async fn stopped(&self) {
        self.shutdown.wait_for_workers().await;
        while self.shutdown.state() != crate::server::shutdown::STOPPED {
            tokio::task::yield_now().await;
        }
    }
}

/// An HTTP server that processes incoming connections and requests.
///
/// The server uses a pre-allocated connection pool for maximum performance
/// and implements graceful connection handling with configurable limits.
///
/// # Examples
///
/// ```no_run
/// use mingoose::{Server, Handler, Request, Response, Handled, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    queue: Arc<AcceptQueue>,
    error_queue: ErrorQueue,
    shutdown: Arc<ShutdownCoordinator>,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # mingoose::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use mingoose::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder<H, S>() -> ServerBuilder<H, S, ()>
    where
        H: Handler<S>,
        S: ConnectionData,
    {
        ServerBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            events: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Returns a cloneable handle for requesting graceful shutdown.
    ///
    /// Must be called before [`launch`](Self::launch), which consumes `self`.
    #[inline]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Starts the server and begins accepting incoming connections.
    ///
    /// Runs the acceptor loop on the calling task until a [`ServerHandle`]
    /// requests a stop, then waits for every worker to drain before
    /// returning.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # mingoose::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use mingoose::Server;
    /// use tokio::net::TcpListener;
    ///
    /// Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch()
    ///     .await
    /// # }
    /// ```
    #[inline]
    pub async fn launch(self) {
        const POLL_INTERVAL: Duration = Duration::from_millis(200);

        tracing::info!("acceptor started");

        while self.shutdown.is_running() {
            let accepted = tokio::time::timeout(POLL_INTERVAL, self.listener.accept()).await;

            let Ok(accept_result) = accepted else {
                continue;
            };
            let accept_result = accept_result.inspect_err(|err| {
                tracing::warn!(%err, "accept failed");
            });
            let Ok((stream, client_addr)) = accept_result else {
                continue;
            };
            let Ok(server_addr) = stream.local_addr() else {
                continue;
            };

            tracing::debug!(%client_addr, "connection accepted");
            let socket = AcceptedSocket { stream, client_addr, server_addr };

            if self.queue.len() < self.server_limits.max_pending_connections {
                self.queue.enqueue(socket).await;
            } else {
                tracing::warn!(%client_addr, "accept queue full, rejecting with 503");
                self.error_queue.push(socket);
            }
        }

        tracing::info!("acceptor stopping, draining workers");
        self.queue.stop();
        self.shutdown.wait_for_workers().await;
        self.shutdown.mark_stopped();
        tracing::info!("server stopped");
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    events: Arc<dyn EventSink>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            events: self.events,
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
        }
    }

    /// Installs a sink for server lifecycle events (worker start/stop,
    /// request completion). See [`EventSink`] for the available hooks.
    #[inline(always)]
    pub fn events<E: EventSink>(mut self, events: E) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Configures server-level concurrency, queueing, and overload behavior.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts and lifetime limits.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing and processing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `handler` method must be called to create``
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `handler` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, handler, filter, events, limits) = self.get_all_parts();

        let queue = Arc::new(AcceptQueue::new(limits.0.accept_queue_capacity));
        let error_queue: ErrorQueue = Arc::new(SegQueue::new());
        let shutdown = Arc::new(ShutdownCoordinator::new(limits.0.max_connections));

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&queue, &shutdown, &limits, &filter, &handler, &events);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        Server {
            listener,
            queue,
            error_queue,
            shutdown,
            server_limits: limits.0,
        }
    }

    #[inline]
    fn spawn_worker(
        queue: &Arc<AcceptQueue>,
        shutdown: &Arc<ShutdownCoordinator>,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
        events: &Arc<dyn EventSink>,
    ) {
        let queue = queue.clone();
        let shutdown = shutdown.clone();
        let filter = filter.clone();
        let events = events.clone();
        let mut conn = HttpConnection::new(handler.clone(), events.clone(), limits.clone());

        tokio::spawn(async move {
            events.thread_begin();
            tracing::info!("worker started");

            loop {
                let (socket, more) = queue.dequeue().await;

                let Some(AcceptedSocket { mut stream, client_addr, server_addr }) = socket else {
                    break;
                };

                if filter
                    .filter(client_addr, server_addr, &mut conn.response)
                    .is_err()
                    || filter
                        .filter_async(client_addr, server_addr, &mut conn.response)
                        .await
                        .is_err()
                {
                    let _ = conn
                        .conn_limits
                        .write_bytes(&mut stream, conn.response.buffer())
                        .await;

                    conn.response.reset(&conn.resp_limits);
                } else {
                    let _ = conn.run(&mut stream, client_addr, server_addr).await;
                }

                if !more {
                    break;
                }
            }

            events.thread_end();
            shutdown.worker_exited();
            tracing::info!("worker exited");
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &ErrorQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let Some(AcceptedSocket { mut stream, .. }) = Self::get_overflow(&queue, &server_limits).await else {
                    tokio::task::yield_now().await;
                    continue;
                };

                let _ = conn_limits
                    .send_error(
                        &mut stream,
                        ErrorKind::ServiceUnavailable,
                        Version::Http11,
                        server_limits.json_errors,
                    )
                    .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &ErrorQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let Some(socket) = Self::get_overflow(&queue, &server_limits).await else {
                    tokio::task::yield_now().await;
                    continue;
                };

                drop(socket.stream);
            }
        });
    }

    #[inline]
    async fn get_overflow(queue: &ErrorQueue, limits: &ServerLimits) -> Option<AcceptedSocket> {
        match queue.pop() {
            Some(socket) => Some(socket),
            None => {
                match limits.wait_strategy {
                    crate::limits::WaitStrategy::Yield => tokio::task::yield_now().await,
                    crate::limits::WaitStrategy::Sleep(time) => tokio::time::sleep(time).await,
                }
                queue.pop()
            }
        }
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<H>, Arc<F>, Arc<dyn EventSink>, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.handler
                .expect("The `handler` method must be called to create"),
            self.connection_filter,
            self.events,
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.request_limits
                    .clone()
                    .unwrap_or_default()
                    .precalculate(),
                self.response_limits.clone().unwrap_or_default(),
            ),
        )
    }
}

type ErrorQueue = Arc<SegQueue<AcceptedSocket>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);
