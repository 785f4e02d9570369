//! Webhook listener built on Axum.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use axum::Router;
use axum::extract::Request;
use axum::routing::get;
use david_core::{DavidError, Result, WebhookConfig};
use david_scheduler::{EventId, Task, WebhookDispatcher, WebhookRoute};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::lock;

/// Shared state for the listener: config plus the routing table, one entry
/// per webhook event in registration order.
pub(crate) struct GatewayState {
    pub(crate) config: WebhookConfig,
    routes: RwLock<Vec<(WebhookRoute, Vec<Task>)>>,
}

impl GatewayState {
    fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Copy of the routing table, so no lock is held while verifiers run.
    pub(crate) fn snapshot(&self) -> Vec<(WebhookRoute, Vec<Task>)> {
        self.routes
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn routes_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(WebhookRoute, Vec<Task>)>> {
        self.routes
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

struct Serving {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Listener lifecycle. `Starting` holds the slot while the socket binds.
enum Listener {
    Idle,
    Starting,
    Serving(Serving),
}

/// The webhook dispatcher: owns the HTTP listener and the event routing table.
pub struct WebhookServer {
    state: Arc<GatewayState>,
    custom: Router,
    listener: Mutex<Listener>,
}

impl WebhookServer {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            state: Arc::new(GatewayState::new(config)),
            custom: Router::new(),
            listener: Mutex::new(Listener::Idle),
        }
    }

    /// Serve extra endpoints ahead of webhook dispatch (e.g. a CRC challenge
    /// handler). The homepage takes precedence over a custom `GET /`.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.custom = self.custom.merge(routes);
        self
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.state.config
    }

    /// Number of webhook events currently routed.
    pub fn event_count(&self) -> usize {
        self.state.snapshot().len()
    }

    /// Build the Axum router: homepage, custom routes, then webhook dispatch
    /// for everything else.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let dispatch = move |request: Request| crate::routes::dispatch(state.clone(), request);

        let inner = self
            .custom
            .clone()
            .fallback(dispatch.clone())
            // A custom GET route must not swallow a POST webhook on the same path.
            .method_not_allowed_fallback(dispatch);

        let router = if self.state.config.homepage {
            // Homepage sits in its own router so a custom `/` cannot overlap it.
            let forward = move |request: Request| {
                let inner = inner.clone();
                async move { inner.oneshot(request).await.unwrap_or_else(|never| match never {}) }
            };
            Router::new()
                .route("/", get(crate::routes::homepage))
                .fallback(forward.clone())
                .method_not_allowed_fallback(forward)
        } else {
            inner
        };
        router.layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve in the background. Returns the bound
    /// address (useful with port 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        {
            let mut listener = lock(&self.listener);
            if !matches!(*listener, Listener::Idle) {
                return Err(DavidError::AlreadyStarted);
            }
            *listener = Listener::Starting;
        }

        let bound = match tokio::net::TcpListener::bind(self.state.config.bind_addr()).await {
            Ok(bound) => bound,
            Err(e) => {
                *lock(&self.listener) = Listener::Idle;
                return Err(e.into());
            }
        };
        let addr = match bound.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                *lock(&self.listener) = Listener::Idle;
                return Err(e.into());
            }
        };
        let (shutdown, signal) = oneshot::channel::<()>();
        let app = self.router();
        let handle = tokio::spawn(async move {
            let server = axum::serve(bound, app).with_graceful_shutdown(async {
                let _ = signal.await;
            });
            if let Err(e) = server.await {
                tracing::error!("❌ Webhook listener failed: {e}");
            }
        });

        tracing::info!("🌐 David listening for webhooks on http://{addr}");
        *lock(&self.listener) = Listener::Serving(Serving {
            addr,
            shutdown,
            handle,
        });
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*lock(&self.listener) {
            Listener::Serving(serving) => Some(serving.addr),
            _ => None,
        }
    }

    /// Stop accepting connections and wait for the listener to exit.
    pub async fn shutdown(&self) {
        let serving = {
            let mut listener = lock(&self.listener);
            match std::mem::replace(&mut *listener, Listener::Idle) {
                Listener::Serving(serving) => Some(serving),
                other => {
                    *listener = other;
                    None
                }
            }
        };
        if let Some(serving) = serving {
            let _ = serving.shutdown.send(());
            if let Err(e) = serving.handle.await {
                tracing::warn!("⚠️ Webhook listener did not exit cleanly: {e}");
            }
            tracing::info!("🛑 Webhook listener on {} stopped", serving.addr);
        }
    }
}

impl WebhookDispatcher for WebhookServer {
    fn register_event(&self, route: WebhookRoute, task: Task) {
        let mut routes = self.state.routes_mut();
        if let Some((_, tasks)) = routes.iter_mut().find(|(r, _)| r.event_id == route.event_id) {
            tasks.push(task);
            return;
        }
        tracing::debug!("📥 Webhook route {} {} ('{}')", route.method, route.path, route.name);
        routes.push((route, vec![task]));
    }

    fn remove_event(&self, event_id: EventId) {
        self.state.routes_mut().retain(|(route, _)| route.event_id != event_id);
    }
}
