// =============================================================================
// EMBER RENDERER - Double-buffered Vulkan frame-submission pipeline
// =============================================================================
//
// The orchestrator drives one strictly ordered sequence per tick:
//
//   Idle -> WaitForGPU -> AcquireImage -> Record -> Submit -> Present -> Idle
//
// with N frame slots overlapping in flight. Synchronization is expressed
// entirely through GPU primitives: each slot's fence proves its previous
// submission finished before the slot is reused, and its two semaphores
// order acquire -> render -> present on the GPU timeline.
//
// FRAME FLOW:
// 1. Wait on the slot's fence (bounded), flush its deletion queue
// 2. Acquire the next swapchain image (stale surface => recreate, skip tick)
// 3. Record: draw target -> content callback -> blit to swapchain image
// 4. Submit, signaling the slot's fence and render semaphore
// 5. Present, waiting on the render semaphore
// 6. Advance the frame counter and move to the next slot
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::image::{self, DrawTarget};
use backend::sync::slot_index;
use backend::{AcquireStatus, DeletionQueue, FrameSlot, Swapchain, VulkanDevice};
use config::Config;
use glam::Vec4;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

/// Bound on every host-side GPU wait (fence wait, image acquire), in
/// nanoseconds. Exceeding it means a hung GPU or driver; there is no
/// recovery from that, so it is treated as fatal.
const GPU_TIMEOUT_NS: u64 = 1_000_000_000;

/// Host sleep while minimized; no GPU work is pending during the pause.
const MINIMIZED_SLEEP: Duration = Duration::from_millis(100);

// One engine per process: the frame slots, swapchain, and deletion queues
// have a single logical owner, and a second instance would fight over the
// same surface.
static ENGINE_CONSTRUCTED: AtomicBool = AtomicBool::new(false);

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Ember renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config)?;
    event_loop.run_app(&mut app)?;

    // Driver-level failures end the loop; report them through the exit code
    if let Some(err) = app.take_fatal_error() {
        return Err(err);
    }

    log::info!("Clean exit");
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== Ember Renderer Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

// =============================================================================
// CONTENT CALLBACK CONTRACT
// =============================================================================

/// Per-tick context handed to the content callback.
///
/// The callback records drawing commands only: the draw target is already in
/// GENERAL layout and must be left there; no layout transitions, no
/// submissions. Transient GPU resources created for this frame go through
/// `deletion_queue`, which runs once this slot's fence next proves the GPU
/// done with them.
pub struct FrameContext<'a> {
    pub device: &'a ash::Device,
    pub cmd: vk::CommandBuffer,
    pub draw_image: vk::Image,
    pub draw_extent: vk::Extent2D,
    pub frame_number: u64,
    pub deletion_queue: &'a mut DeletionQueue,
}

pub type DrawContentFn = Box<dyn FnMut(&mut FrameContext<'_>)>;

/// Placeholder content: clear the draw target with the configured color,
/// pulsing over time so motion is visible without any scene.
fn flashing_clear(base_color: [f32; 4]) -> DrawContentFn {
    Box::new(move |ctx| {
        let flash = (ctx.frame_number as f32 / 120.0).sin().abs();
        let mut color = Vec4::from_array(base_color) * flash;
        color.w = 1.0;

        let clear_value = vk::ClearColorValue {
            float32: color.to_array(),
        };
        let range = image::subresource_range(vk::ImageAspectFlags::COLOR);

        unsafe {
            ctx.device.cmd_clear_color_image(
                ctx.cmd,
                ctx.draw_image,
                vk::ImageLayout::GENERAL,
                &clear_value,
                &[range],
            );
        }
    })
}

// =============================================================================
// TICK GATING
// =============================================================================

/// What this tick should do, decided before any GPU call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickAction {
    /// Minimized: no acquire, no submit, no present.
    Skip,
    /// A stale surface was reported earlier; rebuild before rendering.
    RecreateFirst,
    Render,
}

fn decide_tick(minimized: bool, recreate_pending: bool) -> TickAction {
    if minimized {
        TickAction::Skip
    } else if recreate_pending {
        TickAction::RecreateFirst
    } else {
        TickAction::Render
    }
}

/// Resolution the content is rendered at: never larger than either the draw
/// image or the swapchain, scaled down by the configured render scale. The
/// final blit rescales to the presentation resolution.
fn scaled_draw_extent(
    target: vk::Extent2D,
    swapchain: vk::Extent2D,
    scale: f32,
) -> vk::Extent2D {
    vk::Extent2D {
        width: (target.width.min(swapchain.width) as f32 * scale) as u32,
        height: (target.height.min(swapchain.height) as f32 * scale) as u32,
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct holding all Vulkan resources.
///
/// Teardown order is explicit in Drop: GPU idle first, then per-slot
/// resources, the draw target, the swapchain, the global deletion queue
/// (surface), and finally the device itself.
pub struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW & SURFACE
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    surface: Option<vk::SurfaceKHR>,
    surface_loader: Option<ash::extensions::khr::Surface>,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,
    draw_target: Option<DrawTarget>,

    // ─────────────────────────────────────────────────────────────────────────
    // FRAME SLOTS & DEFERRED DESTRUCTION
    // ─────────────────────────────────────────────────────────────────────────
    frame_slots: Vec<FrameSlot>,
    /// Monotonic tick counter; advances only on successfully presented
    /// frames. Selects the slot via `frame_number % slot count`.
    frame_number: u64,
    /// Flushed once at shutdown, after every per-slot queue.
    main_deletion_queue: DeletionQueue,

    // ─────────────────────────────────────────────────────────────────────────
    // CONTENT
    // ─────────────────────────────────────────────────────────────────────────
    draw_content: DrawContentFn,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Surface reported stale (resize/out-of-date) - rebuild before rendering
    pub needs_resize: bool,
    /// Window is minimized (size = 0) - the tick loop is suspended
    pub is_minimized: bool,
    fatal_error: Option<anyhow::Error>,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    fps_frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    /// Build the (single) engine instance. Fails if one already exists in
    /// this process.
    pub fn new(config: Config) -> Result<Self> {
        if ENGINE_CONSTRUCTED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            anyhow::bail!("an engine instance already exists in this process");
        }

        let is_fullscreen = config.window.fullscreen;
        let clear_color = config.graphics.clear_color;
        let now = Instant::now();

        Ok(Self {
            config,
            window: None,
            surface: None,
            surface_loader: None,
            is_fullscreen,
            device: None,
            swapchain: None,
            draw_target: None,
            frame_slots: Vec::new(),
            frame_number: 0,
            main_deletion_queue: DeletionQueue::new(),
            draw_content: flashing_clear(clear_color),
            needs_resize: false,
            is_minimized: false,
            fatal_error: None,
            fps_frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        })
    }

    /// Replace the placeholder content callback. See [`FrameContext`] for
    /// what the callback may and may not record.
    #[allow(dead_code)]
    pub fn set_draw_content(&mut self, draw_content: DrawContentFn) {
        self.draw_content = draw_content;
    }

    pub fn take_fatal_error(&mut self) -> Option<anyhow::Error> {
        self.fatal_error.take()
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Initialize all Vulkan resources:
    /// 1. Device (instance, GPU selection, logical device, allocator)
    /// 2. Surface (via ash-window, destroyed through the global queue)
    /// 3. Swapchain + draw target
    /// 4. Frame slot ring
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        use rwh05::{HasRawDisplayHandle, HasRawWindowHandle};

        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        // ash-window 0.12 consumes raw-window-handle 0.5 handles; source them
        // directly from winit via its `rwh_05` feature (these accessors are
        // infallible in the 0.5 API).
        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        let device = VulkanDevice::new(
            &self.config.window.title,
            enable_validation,
            self.config.gpu_preference(),
            display_handle,
        )?;

        let surface_loader =
            ash::extensions::khr::Surface::new(device.entry(), &device.instance);

        let surface = unsafe {
            ash_window::create_surface(
                device.entry(),
                &device.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        // The surface outlives every swapchain built on it; its destruction
        // runs at the global flush point, after the final chain is gone.
        {
            let loader = surface_loader.clone();
            self.main_deletion_queue
                .push(move || unsafe { loader.destroy_surface(surface, None) });
        }

        // Verify the selected GPU can present to this surface
        let surface_support = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )?
        };

        if !surface_support {
            anyhow::bail!("selected GPU cannot present to this surface");
        }

        self.device = Some(device.clone());
        self.surface = Some(surface);
        self.surface_loader = Some(surface_loader);

        self.create_swapchain_resources(&window)?;

        // The slot ring persists across swapchain recreations
        let slot_count = self.config.graphics.frames_in_flight.max(1);
        self.frame_slots = (0..slot_count)
            .map(|_| FrameSlot::new(&device))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Vulkan initialized with {} frame slots",
            self.frame_slots.len()
        );
        Ok(())
    }

    /// Create the swapchain and draw target for the current window size.
    ///
    /// Called at startup and again after every stale-surface report. The
    /// caller guarantees the GPU is idle with respect to the old resources
    /// (nothing submitted yet, or an explicit wait_idle).
    fn create_swapchain_resources(&mut self, window: &Window) -> Result<()> {
        let device = self.device.clone().context("Device not initialized")?;
        let surface = self.surface.context("Surface not initialized")?;
        let surface_loader = self
            .surface_loader
            .as_ref()
            .context("Surface loader not initialized")?;

        let size = window.inner_size();

        // A zero-sized window cannot back a swapchain; suspend instead
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // One swapchain per surface: the old chain goes before its
        // replacement is built
        self.swapchain = None;
        if let Some(mut old_target) = self.draw_target.take() {
            old_target.destroy(&device);
        }

        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            surface_loader,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            self.config.get_present_mode(),
        )?;

        let draw_target = DrawTarget::new(
            &device,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        )?;

        self.swapchain = Some(swapchain);
        self.draw_target = Some(draw_target);
        self.needs_resize = false;

        Ok(())
    }

    /// Rebuild the swapchain and draw target after a stale-surface report.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let Some(device) = self.device.clone() else {
            return Ok(());
        };

        // Full idle: the old images may still be referenced by in-flight work
        device.wait_idle()?;

        // Device idle proves every per-slot deferral safe to run now
        for slot in &mut self.frame_slots {
            slot.deletion_queue.flush();
        }

        let window = self.window.clone();
        if let Some(ref win) = window {
            self.create_swapchain_resources(win)?;
        }

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Run one tick of the frame state machine. Returns `Ok(true)` when a
    /// frame was presented, `Ok(false)` for a skipped tick (minimized or
    /// stale surface). Any `Err` is unrecoverable.
    pub fn render_frame(&mut self) -> Result<bool> {
        match decide_tick(self.is_minimized, self.needs_resize) {
            TickAction::Skip => return Ok(false),
            TickAction::RecreateFirst => {
                self.recreate_swapchain()?;
                if self.is_minimized || self.needs_resize {
                    return Ok(false);
                }
            }
            TickAction::Render => {}
        }

        let device = self.device.clone().context("Device not initialized")?;
        anyhow::ensure!(!self.frame_slots.is_empty(), "frame slots not initialized");
        let slot_idx = slot_index(self.frame_number, self.frame_slots.len());

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: WaitForGPU
        // ─────────────────────────────────────────────────────────────────────
        // The fence proves this slot's previous submission is done; only then
        // may its command buffer be re-recorded and its deferred resources
        // destroyed.
        {
            let slot = &mut self.frame_slots[slot_idx];
            let fences = [slot.render_fence];
            unsafe { device.device.wait_for_fences(&fences, true, GPU_TIMEOUT_NS) }
                .context("frame fence wait timed out; GPU appears hung")?;
            slot.deletion_queue.flush();
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: AcquireImage
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let image_index = match swapchain.acquire_next_image(
            GPU_TIMEOUT_NS,
            self.frame_slots[slot_idx].swapchain_semaphore,
        )? {
            AcquireStatus::Acquired { index, suboptimal } => {
                if suboptimal {
                    // Still usable this frame; rebuild before the next one
                    self.needs_resize = true;
                }
                index
            }
            AcquireStatus::OutOfDate => {
                // Skipped tick: nothing submitted, the fence stays signaled,
                // the frame counter does not advance
                self.needs_resize = true;
                return Ok(false);
            }
        };

        let swapchain_image = swapchain.images[image_index as usize];
        let swapchain_extent = swapchain.extent;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record
        // ─────────────────────────────────────────────────────────────────────
        let target = self.draw_target.as_ref().context("Draw target not initialized")?;
        let draw_extent =
            scaled_draw_extent(target.extent, swapchain_extent, self.config.render_scale());

        let slot = &mut self.frame_slots[slot_idx];
        let cmd = slot.command_buffer;

        unsafe {
            // Re-arm the fence only now that this tick is committed to
            // submitting; an aborted tick must leave it signaled
            device.device.reset_fences(&[slot.render_fence])
                .context("Failed to reset frame fence")?;

            device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;
        }

        // Draw target becomes writable for the content callback
        image::transition_image(
            &device.device,
            cmd,
            target.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );

        {
            let mut ctx = FrameContext {
                device: &device.device,
                cmd,
                draw_image: target.image,
                draw_extent,
                frame_number: self.frame_number,
                deletion_queue: &mut slot.deletion_queue,
            };
            (self.draw_content)(&mut ctx);
        }

        // Composite: draw target -> acquired swapchain image, then make the
        // swapchain image presentable
        image::transition_image(
            &device.device,
            cmd,
            target.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        image::transition_image(
            &device.device,
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        image::copy_image_to_image(
            &device.device,
            cmd,
            target.image,
            swapchain_image,
            draw_extent,
            swapchain_extent,
        );
        image::transition_image(
            &device.device,
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe {
            device
                .device
                .end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit
        // ─────────────────────────────────────────────────────────────────────
        // Wait for the acquired image at color output, signal the render
        // semaphore after all graphics stages, and the slot's fence when the
        // whole batch completes
        let wait_info = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(slot.swapchain_semaphore)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .device_index(0)
            .value(1)
            .build()];
        let signal_info = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(slot.render_semaphore)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
            .device_index(0)
            .value(1)
            .build()];
        let cmd_info = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(cmd)
            .device_mask(0)
            .build()];

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_info)
            .command_buffer_infos(&cmd_info)
            .signal_semaphore_infos(&signal_info);

        unsafe {
            device
                .device
                .queue_submit2(
                    device.graphics_queue,
                    &[submit_info.build()],
                    slot.render_fence,
                )
                .context("Failed to submit frame commands")?;
        }

        let render_semaphore = slot.render_semaphore;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        if swapchain.present(device.graphics_queue, image_index, &[render_semaphore])? {
            // Deferred: rebuild before the next acquire, this frame was shown
            self.needs_resize = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Advance to the next slot
        // ─────────────────────────────────────────────────────────────────────
        self.frame_number += 1;

        Ok(true)
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    pub fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.fps_frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.fps_frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.fps_frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            self.fatal_error = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // RESIZE / MINIMIZE / RESTORE
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                match self.render_frame() {
                    Ok(rendered) => {
                        if rendered {
                            self.update_fps();
                        }
                    }
                    Err(e) => {
                        // The driver state is no longer trustworthy; stop
                        // and report through the exit code
                        log::error!("Unrecoverable render error: {:#}", e);
                        self.fatal_error = Some(e);
                        event_loop.exit();
                    }
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block. Drives continuous
    /// redraws; while minimized, throttles instead of spinning.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.is_minimized {
            std::thread::sleep(MINIMIZED_SLEEP);
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(device) = self.device.take() {
            // Nothing may be destroyed while the GPU can still touch it
            let _ = device.wait_idle();

            // 1. Frame slots: flush each deletion queue, then the slot's own
            //    sync objects and command pool
            for slot in &mut self.frame_slots {
                slot.destroy(&device.device);
            }
            self.frame_slots.clear();

            // 2. Draw target
            if let Some(mut target) = self.draw_target.take() {
                target.destroy(&device);
            }

            // 3. Swapchain (views + chain), before the surface it was built on
            self.swapchain = None;

            // 4. Global deletion queue - destroys the surface
            self.main_deletion_queue.flush();

            // 5. Device/instance fall out of scope last via the Arc
        }

        ENGINE_CONSTRUCTED.store(false, Ordering::SeqCst);
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_ticks_are_skipped_entirely() {
        assert_eq!(decide_tick(true, false), TickAction::Skip);
        // Minimize wins even with a rebuild pending; no surface to build on
        assert_eq!(decide_tick(true, true), TickAction::Skip);
    }

    #[test]
    fn stale_surface_forces_recreation_before_rendering() {
        assert_eq!(decide_tick(false, true), TickAction::RecreateFirst);
        assert_eq!(decide_tick(false, false), TickAction::Render);
    }

    #[test]
    fn draw_extent_is_bounded_by_both_images() {
        let target = vk::Extent2D {
            width: 1700,
            height: 900,
        };
        let swapchain = vk::Extent2D {
            width: 1280,
            height: 1024,
        };

        let extent = scaled_draw_extent(target, swapchain, 1.0);
        assert_eq!((extent.width, extent.height), (1280, 900));

        let halved = scaled_draw_extent(target, swapchain, 0.5);
        assert_eq!((halved.width, halved.height), (640, 450));
    }
}
