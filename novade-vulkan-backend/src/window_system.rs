//! The windowing-system collaborator.
//!
//! The backend never speaks the X protocol itself. Everything it needs from
//! the server (which extensions exist, how a pixmap is laid out in memory,
//! shared-memory segment plumbing, and the presentable surface) goes through
//! [`WindowSystem`], implemented by the compositor on top of its own
//! connection.

use std::ffi::c_void;
use std::os::fd::OwnedFd;

use ash::vk;

/// An X pixmap id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixmapId(pub u32);

/// An X window id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u32);

/// An MIT-SHM segment id allocated on the X connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmSegmentId(pub u32);

/// The subset of the pixmap's visual the backend cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisualInfo {
    pub alpha_size: u8,
}

impl VisualInfo {
    pub fn has_alpha(&self) -> bool {
        self.alpha_size > 0
    }
}

/// Server extensions relevant to pixmap import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSystemExtensions {
    pub dri3: bool,
    pub shm: bool,
}

/// One plane of an exported pixmap buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: u32,
    pub stride: u32,
}

/// The answer to a DRI3 `BuffersFromPixmap` request.
#[derive(Debug)]
pub struct PixmapBuffers {
    pub width: u16,
    pub height: u16,
    pub modifier: u64,
    pub planes: Vec<PlaneLayout>,
    /// One DMA-BUF file descriptor per plane.
    pub fds: Vec<OwnedFd>,
}

/// Size of a drawable in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
}

pub trait WindowSystem {
    fn extensions(&self) -> WindowSystemExtensions;

    /// Exports the pixmap's native buffers (DRI3).
    fn buffers_from_pixmap(&self, pixmap: PixmapId) -> anyhow::Result<PixmapBuffers>;

    fn pixmap_geometry(&self, pixmap: PixmapId) -> anyhow::Result<Geometry>;

    /// Size of the window the backend presents to. Used when the surface
    /// does not dictate the swapchain extent.
    fn window_geometry(&self, window: WindowId) -> anyhow::Result<Geometry>;

    /// Attaches the SysV segment `shmid` to the server, read-write.
    fn shm_attach(&self, shmid: i32) -> anyhow::Result<ShmSegmentId>;

    fn shm_detach(&self, segment: ShmSegmentId) -> anyhow::Result<()>;

    /// Asks the server to write the pixmap's current contents, as a Z-format
    /// image with all planes, to offset zero of `segment`. Blocks until the
    /// reply arrives.
    fn shm_get_image(
        &self,
        pixmap: PixmapId,
        width: u16,
        height: u16,
        segment: ShmSegmentId,
    ) -> anyhow::Result<()>;

    /// Instance extensions needed by [`WindowSystem::create_surface`], in
    /// addition to `VK_KHR_surface`.
    fn surface_extensions(&self) -> Vec<&'static std::ffi::CStr> {
        vec![ash::extensions::khr::XcbSurface::name()]
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
        window: WindowId,
    ) -> anyhow::Result<vk::SurfaceKHR>;

    /// Whether `queue_family` of `physical_device` can present to this server.
    fn presentation_support(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> bool;
}

/// Creates an XCB surface for `window`.
///
/// `connection` must be a live `xcb_connection_t` that outlives the surface.
pub fn create_xcb_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    connection: *mut c_void,
    window: WindowId,
) -> anyhow::Result<vk::SurfaceKHR> {
    if connection.is_null() {
        anyhow::bail!("XCB connection pointer is null");
    }

    let xcb_surface_loader = ash::extensions::khr::XcbSurface::new(entry, instance);
    let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
        .connection(connection)
        .window(window.0);

    let surface = unsafe { xcb_surface_loader.create_xcb_surface(&create_info, None)? };
    Ok(surface)
}

/// `vkGetPhysicalDeviceXcbPresentationSupportKHR` for the given root visual.
pub fn xcb_presentation_support(
    entry: &ash::Entry,
    instance: &ash::Instance,
    connection: *mut c_void,
    visual_id: u32,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> bool {
    if connection.is_null() {
        return false;
    }

    let xcb_surface_loader = ash::extensions::khr::XcbSurface::new(entry, instance);
    let connection_ref: &mut vk::xcb_connection_t =
        unsafe { &mut *(connection as *mut vk::xcb_connection_t) };
    unsafe {
        xcb_surface_loader.get_physical_device_xcb_presentation_support(
            physical_device,
            queue_family,
            connection_ref,
            visual_id,
        )
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory stand-in for an X server, used by unit tests.

    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    pub struct MockWindowSystem {
        pub extensions: WindowSystemExtensions,
        pub geometry: Option<Geometry>,
        pub requests: RefCell<Vec<String>>,
    }

    impl WindowSystem for MockWindowSystem {
        fn extensions(&self) -> WindowSystemExtensions {
            self.extensions
        }

        fn buffers_from_pixmap(&self, pixmap: PixmapId) -> anyhow::Result<PixmapBuffers> {
            self.requests.borrow_mut().push(format!("buffers_from_pixmap {:#x}", pixmap.0));
            anyhow::bail!("no DRI3 buffers for {:#x}", pixmap.0)
        }

        fn pixmap_geometry(&self, pixmap: PixmapId) -> anyhow::Result<Geometry> {
            self.requests.borrow_mut().push(format!("pixmap_geometry {:#x}", pixmap.0));
            self.geometry.ok_or_else(|| anyhow::anyhow!("unknown pixmap"))
        }

        fn window_geometry(&self, window: WindowId) -> anyhow::Result<Geometry> {
            self.requests.borrow_mut().push(format!("window_geometry {:#x}", window.0));
            Ok(Geometry { width: 1920, height: 1080 })
        }

        fn shm_attach(&self, shmid: i32) -> anyhow::Result<ShmSegmentId> {
            self.requests.borrow_mut().push(format!("shm_attach {shmid}"));
            Ok(ShmSegmentId(7))
        }

        fn shm_detach(&self, segment: ShmSegmentId) -> anyhow::Result<()> {
            self.requests.borrow_mut().push(format!("shm_detach {}", segment.0));
            Ok(())
        }

        fn shm_get_image(
            &self,
            pixmap: PixmapId,
            width: u16,
            height: u16,
            segment: ShmSegmentId,
        ) -> anyhow::Result<()> {
            self.requests
                .borrow_mut()
                .push(format!("shm_get_image {:#x} {width}x{height} {}", pixmap.0, segment.0));
            Ok(())
        }

        fn create_surface(
            &self,
            _entry: &ash::Entry,
            _instance: &ash::Instance,
            _window: WindowId,
        ) -> anyhow::Result<vk::SurfaceKHR> {
            anyhow::bail!("mock window system has no surface")
        }

        fn presentation_support(
            &self,
            _entry: &ash::Entry,
            _instance: &ash::Instance,
            _physical_device: vk::PhysicalDevice,
            _queue_family: u32,
        ) -> bool {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_significance_follows_alpha_bits() {
        assert!(VisualInfo { alpha_size: 8 }.has_alpha());
        assert!(!VisualInfo { alpha_size: 0 }.has_alpha());
    }

    #[test]
    fn default_surface_extensions_request_xcb() {
        let ws = mock::MockWindowSystem::default();
        assert_eq!(
            ws.surface_extensions(),
            vec![ash::extensions::khr::XcbSurface::name()]
        );
    }
}
