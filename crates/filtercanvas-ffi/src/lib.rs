//! C ABI over [`filtercanvas::Canvas`] for mobile hosts.
//!
//! Every entry point returns a status code: `0` for success, `1` when a frame
//! was throttled by the budget, and a negative [`CanvasError::status_code`]
//! otherwise. Handles are opaque; the host owns them between
//! [`canvas_create`] and [`canvas_destroy`].

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use canvasconfig::CanvasConfig;
use filtercanvas::{
    Canvas, CanvasError, CanvasOptions, CompletionCallback, FilterVariant, FrameBudget,
    FrameOutcome, GpuBackend, PixelFormat, RenderBackend, Rotation, SurfaceTarget, TextureUpload,
};
use tracing_subscriber::EnvFilter;

pub const FC_STATUS_OK: i32 = 0;
pub const FC_STATUS_THROTTLED: i32 = 1;
/// A panic was caught at the boundary; the canvas is disabled afterwards.
pub const FC_STATUS_PANIC: i32 = -100;

/// Host-side description of the view to draw into.
///
/// On Apple platforms pass the `CAMetalLayer` in `layer`; on Android pass the
/// `ANativeWindow` in `view`. With both null the canvas renders offscreen.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostViewObj {
    pub view: *mut c_void,
    pub layer: *mut c_void,
    pub width: u32,
    pub height: u32,
    pub scale_factor: f32,
    /// `<= 0` means unbounded.
    pub maximum_frames: i32,
    /// With a positive `maximum_frames`, the rolling window in milliseconds
    /// those frames are spread over. `0` makes the budget a lifetime cap.
    pub budget_window_ms: u32,
    /// Called with the 1-based index of each completed frame, after the
    /// canvas lock is released, so it may call back into the canvas.
    pub callback_to_app: Option<extern "C" fn(i32)>,
}

/// Opaque canvas handle handed to the host.
pub struct CanvasHandle<B: RenderBackend = GpuBackend> {
    canvas: Mutex<Canvas<B>>,
    notifier: HostNotifier,
}

impl<B: RenderBackend> CanvasHandle<B> {
    fn new(canvas: Canvas<B>, notifier: HostNotifier) -> Self {
        Self {
            canvas: Mutex::new(canvas),
            notifier,
        }
    }

    /// A panic inside an earlier call poisons the lock; the canvas it
    /// guarded has been disabled by then, so the poison is ignored.
    fn lock(&self) -> MutexGuard<'_, Canvas<B>> {
        self.canvas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Queues completed frame indices for the host callback. The canvas only
/// records them; [`HostNotifier::deliver`] runs once the canvas is unlocked.
#[derive(Clone, Default)]
struct HostNotifier {
    callback: Option<extern "C" fn(i32)>,
    pending: Arc<Mutex<Vec<u64>>>,
}

impl HostNotifier {
    fn new(callback: Option<extern "C" fn(i32)>) -> Self {
        Self {
            callback,
            pending: Arc::default(),
        }
    }

    fn completion_callback(&self) -> Option<CompletionCallback> {
        self.callback?;
        let pending = Arc::clone(&self.pending);
        Some(Arc::new(move |index: u64| {
            pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(index);
        }))
    }

    fn deliver(&self) {
        let Some(callback) = self.callback else {
            return;
        };
        let ready = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for index in ready {
            callback(i32::try_from(index).unwrap_or(i32::MAX));
        }
    }
}

impl HostViewObj {
    fn surface_target(&self) -> Result<SurfaceTarget, CanvasError> {
        let (width, height) = (self.width, self.height);
        if let Some(layer) = NonNull::new(self.layer) {
            return Ok(SurfaceTarget::MetalLayer {
                layer,
                width,
                height,
            });
        }
        match NonNull::new(self.view) {
            None => Ok(SurfaceTarget::Offscreen { width, height }),
            Some(view) => native_window(view, width, height),
        }
    }

    fn budget(&self) -> Option<FrameBudget> {
        if self.maximum_frames <= 0 {
            return None;
        }
        let frames = self.maximum_frames.unsigned_abs();
        Some(match self.budget_window_ms {
            0 => FrameBudget::Lifetime(u64::from(frames)),
            ms => FrameBudget::Window {
                frames,
                period: Duration::from_millis(u64::from(ms)),
            },
        })
    }

    fn apply_to(&self, mut options: CanvasOptions) -> CanvasOptions {
        if let Some(budget) = self.budget() {
            options = options.with_budget(budget);
        }
        if self.scale_factor.is_finite() && self.scale_factor > 0.0 {
            options = options.with_scale_factor(self.scale_factor);
        }
        options
    }
}

#[cfg(target_os = "android")]
fn native_window(
    view: NonNull<c_void>,
    width: u32,
    height: u32,
) -> Result<SurfaceTarget, CanvasError> {
    use raw_window_handle::{
        AndroidDisplayHandle, AndroidNdkWindowHandle, RawDisplayHandle, RawWindowHandle,
    };
    Ok(SurfaceTarget::Window {
        display: RawDisplayHandle::Android(AndroidDisplayHandle::new()),
        window: RawWindowHandle::AndroidNdk(AndroidNdkWindowHandle::new(view)),
        width,
        height,
    })
}

#[cfg(not(target_os = "android"))]
fn native_window(
    _view: NonNull<c_void>,
    _width: u32,
    _height: u32,
) -> Result<SurfaceTarget, CanvasError> {
    Err(CanvasError::InvalidArgument(
        "native views are only accepted on Android; pass a CAMetalLayer as `layer`".into(),
    ))
}

fn create_canvas(
    obj: &HostViewObj,
    options: CanvasOptions,
    notifier: &HostNotifier,
) -> Result<Canvas, CanvasError> {
    let target = obj.surface_target()?;
    Canvas::create(target, obj.apply_to(options), notifier.completion_callback())
}

fn into_raw(result: Result<CanvasHandle, CanvasError>) -> *mut CanvasHandle {
    match result {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(err) => {
            tracing::error!(error = %err, "failed to create canvas");
            ptr::null_mut()
        }
    }
}

unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, CanvasError> {
    if ptr.is_null() {
        return Err(CanvasError::InvalidArgument(format!("{what} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| CanvasError::InvalidArgument(format!("{what} is not valid UTF-8")))
}

/// Runs `op` against the canvas behind `handle`, mapping the outcome to a
/// status code. A panic disables the canvas. Host callbacks for frames
/// completed by `op` run after the lock is released.
unsafe fn with_canvas<B, F>(handle: *const CanvasHandle<B>, op: F) -> i32
where
    B: RenderBackend,
    F: FnOnce(&mut Canvas<B>) -> Result<i32, CanvasError>,
{
    let Some(handle) = handle.as_ref() else {
        return CanvasError::InvalidArgument("canvas handle is null".into()).status_code();
    };
    let result = catch_unwind(AssertUnwindSafe(|| op(&mut handle.lock())));
    let status = match result {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, code = err.status_code(), "canvas call failed");
            err.status_code()
        }
        Err(_) => {
            tracing::error!("panic caught at the C boundary");
            handle.lock().disable("a panic was caught at the C boundary");
            FC_STATUS_PANIC
        }
    };
    handle.notifier.deliver();
    status
}

/// # Safety
/// `obj` must be null or point to a valid `HostViewObj` whose `view`/`layer`
/// stay alive for the lifetime of the returned canvas.
#[no_mangle]
pub unsafe extern "C" fn canvas_create(obj: *const HostViewObj) -> *mut CanvasHandle {
    let Some(obj) = obj.as_ref() else {
        tracing::error!("canvas_create called with a null view object");
        return ptr::null_mut();
    };
    let notifier = HostNotifier::new(obj.callback_to_app);
    let result = create_canvas(obj, CanvasOptions::default(), &notifier)
        .map(|canvas| CanvasHandle::new(canvas, notifier));
    into_raw(result)
}

/// Like [`canvas_create`], with defaults and an initial filter taken from a
/// TOML document. Fields set on `obj` win over the document.
///
/// # Safety
/// As for [`canvas_create`]; `toml` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn canvas_create_with_config(
    obj: *const HostViewObj,
    toml: *const c_char,
) -> *mut CanvasHandle {
    let Some(obj) = obj.as_ref() else {
        tracing::error!("canvas_create_with_config called with a null view object");
        return ptr::null_mut();
    };
    let parsed = str_arg(toml, "config").and_then(|raw| {
        CanvasConfig::from_toml_str(raw)
            .map_err(|err| CanvasError::InvalidArgument(err.to_string()))
    });
    let config = match parsed {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "rejected canvas configuration");
            return ptr::null_mut();
        }
    };

    let notifier = HostNotifier::new(obj.callback_to_app);
    let result = create_canvas(obj, CanvasOptions::from_config(&config), &notifier).and_then(
        |mut canvas| {
            if let Some(filter) = &config.filter {
                canvas.configure_filter(
                    filter.variant.into(),
                    filter.background.unwrap_or(0),
                    filter.param,
                )?;
            }
            Ok(CanvasHandle::new(canvas, notifier))
        },
    );
    into_raw(result)
}

/// # Safety
/// `canvas` must be null or a handle from `canvas_create*` not yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn canvas_destroy(canvas: *mut CanvasHandle) {
    if !canvas.is_null() {
        drop(Box::from_raw(canvas));
    }
}

/// # Safety
/// `canvas` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn canvas_set_filter(
    canvas: *mut CanvasHandle,
    variant: u32,
    background_color: u32,
    param: f32,
) -> i32 {
    with_canvas(canvas, |canvas| {
        let variant = FilterVariant::try_from(variant)?;
        canvas.configure_filter(variant, background_color, param)?;
        Ok(FC_STATUS_OK)
    })
}

/// # Safety
/// `canvas` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn canvas_change_filter_param(canvas: *mut CanvasHandle, param: f32) -> i32 {
    with_canvas(canvas, |canvas| {
        canvas.update_filter_param(param)?;
        Ok(FC_STATUS_OK)
    })
}

/// Uploads tightly packed BGRA8 pixels under `key`.
///
/// # Safety
/// `canvas` must be null or a live handle, `key` a NUL-terminated string and
/// `raw` must point to at least `width * height * 4` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn canvas_set_external_texture(
    canvas: *mut CanvasHandle,
    raw: *const u8,
    key: *const c_char,
    width: u32,
    height: u32,
) -> i32 {
    canvas_set_external_texture_with_layout(
        canvas,
        raw,
        key,
        width,
        height,
        0,
        PixelFormat::Bgra8.code(),
    )
}

/// Uploads pixels with an explicit row stride (`0` for tightly packed) and
/// pixel format code.
///
/// # Safety
/// `canvas` must be null or a live handle, `key` a NUL-terminated string and
/// `raw` must point to `bytes_per_row * (height - 1) + width * 4` readable
/// bytes. The pixels are copied before this returns.
#[no_mangle]
pub unsafe extern "C" fn canvas_set_external_texture_with_layout(
    canvas: *mut CanvasHandle,
    raw: *const u8,
    key: *const c_char,
    width: u32,
    height: u32,
    bytes_per_row: u32,
    format: u32,
) -> i32 {
    with_canvas(canvas, |canvas| {
        let key = str_arg(key, "texture key")?;
        let format = PixelFormat::try_from(format)?;
        if raw.is_null() {
            return Err(CanvasError::InvalidArgument("pixel pointer is null".into()));
        }
        let len = readable_len(width, height, bytes_per_row)?;
        let pixels: &[u8] = if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(raw, len)
        };
        let mut upload = TextureUpload::new(pixels, width, height).with_format(format);
        if bytes_per_row != 0 {
            upload = upload.with_bytes_per_row(bytes_per_row);
        }
        canvas.upsert_texture(key, &upload)?;
        Ok(FC_STATUS_OK)
    })
}

/// Number of bytes the host promises behind the pixel pointer. Layouts that
/// cannot describe a valid image read nothing and are rejected by the upload.
fn readable_len(width: u32, height: u32, bytes_per_row: u32) -> Result<usize, CanvasError> {
    let tight = u64::from(width) * PixelFormat::BYTES_PER_PIXEL as u64;
    let stride = if bytes_per_row == 0 {
        tight
    } else {
        u64::from(bytes_per_row)
    };
    if width == 0 || height == 0 || stride < tight {
        return Ok(0);
    }
    let len = stride * u64::from(height - 1) + tight;
    usize::try_from(len).map_err(|_| {
        CanvasError::InvalidArgument(format!("{width}x{height} upload exceeds address space"))
    })
}

/// # Safety
/// `canvas` must be null or a live handle and `key` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn canvas_remove_texture(
    canvas: *mut CanvasHandle,
    key: *const c_char,
) -> i32 {
    with_canvas(canvas, |canvas| {
        let key = str_arg(key, "texture key")?;
        canvas.remove_texture(key)?;
        Ok(FC_STATUS_OK)
    })
}

/// Renders one frame of the texture under `key`.
///
/// # Safety
/// `canvas` must be null or a live handle and `key` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn canvas_enter_frame(canvas: *mut CanvasHandle, key: *const c_char) -> i32 {
    with_canvas(canvas, |canvas| {
        let key = str_arg(key, "texture key")?;
        match canvas.render_frame(key)? {
            FrameOutcome::Presented { .. } => Ok(FC_STATUS_OK),
            FrameOutcome::Throttled(_) => Ok(FC_STATUS_THROTTLED),
        }
    })
}

/// # Safety
/// `canvas` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn canvas_resize(canvas: *mut CanvasHandle, width: u32, height: u32) -> i32 {
    with_canvas(canvas, |canvas| {
        canvas.resize(width, height)?;
        Ok(FC_STATUS_OK)
    })
}

/// Rotates the source by a multiple of 90 degrees.
///
/// # Safety
/// `canvas` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn canvas_set_rotation(canvas: *mut CanvasHandle, degrees: i32) -> i32 {
    with_canvas(canvas, |canvas| {
        canvas.set_rotation(Rotation::from_degrees(degrees)?)?;
        Ok(FC_STATUS_OK)
    })
}

/// Installs a `tracing` subscriber honouring `RUST_LOG`. Later calls are
/// no-ops.
#[no_mangle]
pub extern "C" fn canvas_init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use filtercanvas::CpuBackend;
    use std::ffi::CString;

    fn offscreen(width: u32, height: u32) -> HostViewObj {
        HostViewObj {
            view: ptr::null_mut(),
            layer: ptr::null_mut(),
            width,
            height,
            scale_factor: 2.0,
            maximum_frames: 3,
            budget_window_ms: 0,
            callback_to_app: None,
        }
    }

    fn cpu_handle(budget: FrameBudget, notifier: HostNotifier) -> CanvasHandle<CpuBackend> {
        let mut canvas = Canvas::with_backend(
            CpuBackend::new(16, 16),
            CanvasOptions::default().with_budget(budget),
            notifier.completion_callback(),
        );
        let pixels = vec![0x60; 4 * 4 * 4];
        canvas
            .upsert_texture("cam", &TextureUpload::new(&pixels, 4, 4))
            .unwrap();
        canvas
            .configure_filter(FilterVariant::CrossHatch, 0, 0.5)
            .unwrap();
        CanvasHandle::new(canvas, notifier)
    }

    fn render(canvas: &mut Canvas<CpuBackend>) -> Result<i32, CanvasError> {
        match canvas.render_frame("cam")? {
            FrameOutcome::Presented { .. } => Ok(FC_STATUS_OK),
            FrameOutcome::Throttled(_) => Ok(FC_STATUS_THROTTLED),
        }
    }

    #[test]
    fn null_view_objects_yield_null_handles() {
        unsafe {
            assert!(canvas_create(ptr::null()).is_null());
            assert!(canvas_create_with_config(ptr::null(), ptr::null()).is_null());
        }
    }

    #[test]
    fn zero_sized_views_yield_null_handles() {
        let obj = offscreen(0, 0);
        unsafe {
            assert!(canvas_create(&obj).is_null());
        }
    }

    #[test]
    fn malformed_config_yields_null_handle() {
        let obj = offscreen(64, 64);
        let toml = CString::new("version = \"one\"").unwrap();
        unsafe {
            assert!(canvas_create_with_config(&obj, toml.as_ptr()).is_null());
            assert!(canvas_create_with_config(&obj, ptr::null()).is_null());
        }
    }

    #[test]
    fn null_handles_report_invalid_argument() {
        let key = CString::new("cam").unwrap();
        let invalid = CanvasError::InvalidArgument(String::new()).status_code();
        let pixels = [0u8; 16];
        unsafe {
            assert_eq!(canvas_set_filter(ptr::null_mut(), 0, 0, 0.5), invalid);
            assert_eq!(canvas_change_filter_param(ptr::null_mut(), 0.5), invalid);
            assert_eq!(
                canvas_set_external_texture(ptr::null_mut(), pixels.as_ptr(), key.as_ptr(), 2, 2),
                invalid
            );
            assert_eq!(canvas_remove_texture(ptr::null_mut(), key.as_ptr()), invalid);
            assert_eq!(canvas_enter_frame(ptr::null_mut(), key.as_ptr()), invalid);
            assert_eq!(canvas_resize(ptr::null_mut(), 10, 10), invalid);
            assert_eq!(canvas_set_rotation(ptr::null_mut(), 90), invalid);
            canvas_destroy(ptr::null_mut());
        }
    }

    #[test]
    fn offscreen_when_no_native_handles() {
        let target = offscreen(32, 16).surface_target().unwrap();
        assert!(target.is_offscreen());
        assert_eq!(target.size(), (32, 16));
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn bare_views_are_rejected_off_android() {
        let mut obj = offscreen(32, 16);
        let mut dummy = 0u8;
        obj.view = (&mut dummy as *mut u8).cast();
        assert!(matches!(
            obj.surface_target(),
            Err(CanvasError::InvalidArgument(_))
        ));
    }

    #[test]
    fn host_fields_override_config_defaults() {
        let options = offscreen(8, 8).apply_to(CanvasOptions::default());
        assert_eq!(options.budget, FrameBudget::Lifetime(3));
        assert_eq!(options.scale_factor, 2.0);

        let mut unbounded = offscreen(8, 8);
        unbounded.maximum_frames = 0;
        let options =
            unbounded.apply_to(CanvasOptions::default().with_budget(FrameBudget::Lifetime(9)));
        assert_eq!(options.budget, FrameBudget::Lifetime(9));
    }

    #[test]
    fn budget_window_turns_the_cap_into_a_rate() {
        let mut obj = offscreen(8, 8);
        obj.maximum_frames = 30;
        obj.budget_window_ms = 1000;
        assert_eq!(
            obj.apply_to(CanvasOptions::default()).budget,
            FrameBudget::Window {
                frames: 30,
                period: Duration::from_secs(1),
            }
        );

        obj.budget_window_ms = 0;
        assert_eq!(
            obj.apply_to(CanvasOptions::default()).budget,
            FrameBudget::Lifetime(30)
        );

        // A window without a frame count leaves the budget alone.
        obj.maximum_frames = -1;
        obj.budget_window_ms = 250;
        assert_eq!(
            obj.apply_to(CanvasOptions::default()).budget,
            FrameBudget::Unbounded
        );
    }

    #[test]
    fn panic_disables_the_canvas_behind_the_handle() {
        let handle = cpu_handle(FrameBudget::Lifetime(4), HostNotifier::default());
        let status = unsafe {
            with_canvas(&handle, |_| -> Result<i32, CanvasError> {
                panic!("host misuse")
            })
        };
        assert_eq!(status, FC_STATUS_PANIC);

        let disabled = CanvasError::CanvasDisabled(String::new()).status_code();
        assert_eq!(unsafe { with_canvas(&handle, render) }, disabled);
        assert!(handle.lock().is_disabled());
        assert_eq!(handle.lock().frames_produced(), 0);
    }

    #[test]
    fn host_callback_runs_after_the_canvas_is_unlocked() {
        use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};
        static HANDLE: AtomicPtr<CanvasHandle<CpuBackend>> = AtomicPtr::new(ptr::null_mut());
        static UNLOCKED: AtomicBool = AtomicBool::new(false);
        static LAST: AtomicI32 = AtomicI32::new(0);
        extern "C" fn record(index: i32) {
            let handle = HANDLE.load(Ordering::SeqCst);
            let free = unsafe { handle.as_ref() }.is_some_and(|h| h.canvas.try_lock().is_ok());
            UNLOCKED.store(free, Ordering::SeqCst);
            LAST.store(index, Ordering::SeqCst);
        }

        let handle = Box::into_raw(Box::new(cpu_handle(
            FrameBudget::Lifetime(2),
            HostNotifier::new(Some(record)),
        )));
        HANDLE.store(handle, Ordering::SeqCst);
        unsafe {
            assert_eq!(with_canvas(handle, render), FC_STATUS_OK);
            assert_eq!(LAST.load(Ordering::SeqCst), 1);
            assert!(UNLOCKED.load(Ordering::SeqCst));

            assert_eq!(with_canvas(handle, render), FC_STATUS_OK);
            assert_eq!(LAST.load(Ordering::SeqCst), 2);
            assert_eq!(with_canvas(handle, render), FC_STATUS_THROTTLED);
            assert_eq!(LAST.load(Ordering::SeqCst), 2);

            HANDLE.store(ptr::null_mut(), Ordering::SeqCst);
            drop(Box::from_raw(handle));
        }
    }

    #[test]
    fn readable_len_accounts_for_padding() {
        assert_eq!(readable_len(4, 2, 0).unwrap(), 32);
        assert_eq!(readable_len(4, 2, 20).unwrap(), 36);
        assert_eq!(readable_len(4, 2, 8).unwrap(), 0);
        assert_eq!(readable_len(0, 2, 0).unwrap(), 0);
    }

    #[test]
    fn callback_saturates_large_indices() {
        use std::sync::atomic::{AtomicI32, Ordering};
        static LAST: AtomicI32 = AtomicI32::new(0);
        extern "C" fn record(index: i32) {
            LAST.store(index, Ordering::SeqCst);
        }
        let notifier = HostNotifier::new(Some(record));
        let callback = notifier.completion_callback().unwrap();
        callback(7);
        assert_eq!(LAST.load(Ordering::SeqCst), 0);
        notifier.deliver();
        assert_eq!(LAST.load(Ordering::SeqCst), 7);
        callback(u64::MAX);
        notifier.deliver();
        assert_eq!(LAST.load(Ordering::SeqCst), i32::MAX);
        assert!(HostNotifier::default().completion_callback().is_none());
    }
}
