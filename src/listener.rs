// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::net::TcpListener as StdTcpListener;

use tokio::net::TcpListener as AsyncTcpListener;
use tower::BoxError;

/// A bound and listening TCP socket.
///
/// The std flavor can be created before the tokio runtime exists so that bind
/// failures are reported during startup, then converted once serving begins.
pub struct Listener {
    inner: ListenerInner,
}

enum ListenerInner {
    Async(AsyncTcpListener),
    Std(StdTcpListener),
}

impl Listener {
    pub fn listen_std(endpoint: SocketAddr) -> Result<Self, BoxError> {
        let l = StdTcpListener::bind(endpoint)
            .map_err(|e| format!("unable to bind to {}: {}", endpoint, e))?;
        Ok(Self {
            inner: ListenerInner::Std(l),
        })
    }

    pub async fn listen_async(endpoint: SocketAddr) -> Result<Self, BoxError> {
        let l = AsyncTcpListener::bind(endpoint)
            .await
            .map_err(|e| format!("unable to bind to {}: {}", endpoint, e))?;
        Ok(Self {
            inner: ListenerInner::Async(l),
        })
    }

    pub fn bound_address(&self) -> Result<SocketAddr, BoxError> {
        Ok(match &self.inner {
            ListenerInner::Async(inner) => inner.local_addr()?,
            ListenerInner::Std(inner) => inner.local_addr()?,
        })
    }

    /// Must be called from within a tokio runtime.
    pub fn into_async(self) -> Result<AsyncTcpListener, BoxError> {
        match self.inner {
            ListenerInner::Async(inner) => Ok(inner),
            ListenerInner::Std(inner) => {
                inner.set_nonblocking(true)?;
                Ok(AsyncTcpListener::from_std(inner)?)
            }
        }
    }
}
