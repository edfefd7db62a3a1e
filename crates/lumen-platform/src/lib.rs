// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! The single platform window the renderer presents into.

mod guard;

use std::time::Duration;

use lumen_render::{RenderSize, RenderTarget};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use thiserror::Error;
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use guard::InstanceGuard;

pub use winit;

/// How long `create` keeps pumping while waiting for the platform to hand
/// out a window.
const CREATE_TIMEOUT: Duration = Duration::from_secs(5);
const CREATE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("a window already exists in this process")]
    AlreadyCreated,
    #[error("event loop: {0}")]
    EventLoop(#[from] EventLoopError),
    #[error("window creation: {0}")]
    Os(#[from] OsError),
    #[error("window closed before it became usable")]
    Closed,
}

#[derive(Default)]
struct SurfaceEvents {
    pending: Option<WindowAttributes>,
    created: Option<Result<Window, OsError>>,
    id: Option<WindowId>,
    closing: bool,
}

impl ApplicationHandler for SurfaceEvents {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(attrs) = self.pending.take() {
            self.created = Some(event_loop.create_window(attrs));
        }
    }

    fn window_event(&mut self, _: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.id.is_some_and(|id| id != window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("close requested");
                self.closing = true;
            }
            WindowEvent::Resized(size) => {
                debug!("resized → {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _: &ActiveEventLoop) {
        self.closing = true;
    }
}

/// Owns one non-resizable window and the event loop feeding it.
///
/// Only one may be alive per process; the slot frees up again when the
/// value drops.
pub struct WindowSurface {
    window: Window,
    events: EventLoop<()>,
    handler: SurfaceEvents,
    _guard: InstanceGuard,
}

impl WindowSurface {
    pub fn create(size: RenderSize, title: &str) -> Result<Self, WindowError> {
        let guard = InstanceGuard::acquire()?;
        let mut events = EventLoop::new()?;
        let mut handler = SurfaceEvents {
            pending: Some(
                Window::default_attributes()
                    .with_title(title)
                    .with_inner_size(PhysicalSize::new(size.width, size.height))
                    .with_resizable(false),
            ),
            ..Default::default()
        };

        let mut waited = Duration::ZERO;
        let window = loop {
            if let PumpStatus::Exit(_) = events.pump_app_events(Some(CREATE_POLL), &mut handler) {
                return Err(WindowError::Closed);
            }
            if let Some(created) = handler.created.take() {
                break created?;
            }
            waited += CREATE_POLL;
            if waited >= CREATE_TIMEOUT || handler.closing {
                return Err(WindowError::Closed);
            }
        };
        handler.id = Some(window.id());

        let inner = window.inner_size();
        info!("window \"{title}\" {}x{}", inner.width, inner.height);
        Ok(Self {
            window,
            events,
            handler,
            _guard: guard,
        })
    }

    /// Drains pending platform events without blocking.
    pub fn pull_events(&mut self) {
        if let PumpStatus::Exit(code) = self
            .events
            .pump_app_events(Some(Duration::ZERO), &mut self.handler)
        {
            debug!("event loop exited with {code}");
            self.handler.closing = true;
        }
    }

    pub fn is_closing(&self) -> bool {
        self.handler.closing
    }

    pub fn extent(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }
}

impl HasWindowHandle for WindowSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for WindowSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl RenderTarget for WindowSurface {
    fn extent(&self) -> RenderSize {
        WindowSurface::extent(self)
    }
}
