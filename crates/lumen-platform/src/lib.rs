// SPDX-License-Identifier: CEPL-1.0
//! Window collaborator: winit re-export, a handle-carrying window wrapper and
//! the resize generation counter polled by the frame loop.
pub use winit;

use lumen_render::{RenderSize, WindowHost};
use portable_atomic::{AtomicU64, Ordering};
use winit::{
    raw_window_handle::{
        DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
    },
    window::Window,
};

/// Owns the winit window and exposes it to render backends.
pub struct PlatformWindow {
    window: Window,
}

impl PlatformWindow {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl WindowHost for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }
}

fn pack(size: RenderSize) -> u64 {
    ((size.width as u64) << 32) | size.height as u64
}

fn unpack(v: u64) -> RenderSize {
    RenderSize::new((v >> 32) as u32, v as u32)
}

/// Latest framebuffer size plus a generation bumped on every notification.
/// Written by the window event handler, read once per loop iteration.
#[derive(Default)]
pub struct ResizeSignal {
    generation: AtomicU64,
    size: AtomicU64,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, size: RenderSize) {
        self.size.store(pack(size), Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> RenderSize {
        unpack(self.size.load(Ordering::Acquire))
    }
}

/// Per-consumer view of a [`ResizeSignal`]; several notifications between two
/// polls collapse into one.
#[derive(Debug, Default)]
pub struct ResizeWatcher {
    seen: u64,
}

impl ResizeWatcher {
    pub fn poll(&mut self, signal: &ResizeSignal) -> Option<RenderSize> {
        let generation = signal.generation();
        if generation == self.seen {
            return None;
        }
        self.seen = generation;
        let size = signal.latest();
        tracing::debug!(
            "resize generation {} → {}x{}",
            generation,
            size.width,
            size.height
        );
        Some(size)
    }
}
