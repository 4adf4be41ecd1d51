use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use pulse::def::BufferAttr;
use pulse::error::{Code, PAErr};
use pulse::sample::{Format, Spec};
use pulse::stream::Direction;
use std::future::Future;
use tracing::{debug, info, warn};

use super::platform::{AudioPlatform, AudioSink, CaptureConstraints, CaptureHandle, CaptureStream};
use crate::error::CaptureError;

const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// PulseAudio/PipeWire implementation of the platform capability.
pub struct PulsePlatform {
    app_name: String,
}

impl PulsePlatform {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Default for PulsePlatform {
    fn default() -> Self {
        Self::new("echoloop")
    }
}

impl AudioPlatform for PulsePlatform {
    fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> impl Future<Output = Result<CaptureHandle, CaptureError>> + Send {
        let app_name = self.app_name.clone();
        async move {
            // Connecting blocks until the server answers
            tokio::task::spawn_blocking(move || open_capture(&app_name, &constraints))
                .await
                .map_err(|e| CaptureError::other(format!("capture task failed: {}", e)))?
        }
    }

    fn open_output(&self, sample_rate: u32, latency_ms: u32) -> Result<Box<dyn AudioSink>, CaptureError> {
        let spec = mono_spec(sample_rate)?;
        let target = bytes_for_ms(sample_rate, latency_ms);
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: target,
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize: u32::MAX,
        };

        let conn = psimple::Simple::new(
            None,
            &self.app_name,
            Direction::Playback,
            None,
            "delayed-feedback",
            &spec,
            None,
            Some(&attr),
        )
        .map_err(classify_pulse_error)?;

        info!("Opened playback stream at {} Hz, target latency {} ms", sample_rate, latency_ms);
        Ok(Box::new(PulseOutput { conn: Some(conn) }))
    }
}

fn mono_spec(sample_rate: u32) -> Result<Spec, CaptureError> {
    let spec = Spec {
        format: Format::F32le,
        channels: 1,
        rate: sample_rate,
    };
    if !spec.is_valid() {
        return Err(CaptureError::other("invalid PulseAudio sample spec"));
    }
    Ok(spec)
}

fn bytes_for_ms(sample_rate: u32, ms: u32) -> u32 {
    (sample_rate as u64 * ms as u64 / 1000) as u32 * BYTES_PER_SAMPLE as u32
}

/// Pick the source to record from.
///
/// `module-echo-cancel` sources apply echo cancellation, noise suppression
/// and gain control, so they are refused when raw capture is requested.
fn select_source(constraints: &CaptureConstraints) -> Option<String> {
    match constraints.device.as_deref() {
        Some(name) if !constraints.wants_voice_processing() && name.contains("echo-cancel") => {
            warn!("Source {} applies voice processing, using the default source instead", name);
            None
        }
        Some(name) => Some(name.to_string()),
        None => None,
    }
}

fn open_capture(app_name: &str, constraints: &CaptureConstraints) -> Result<CaptureHandle, CaptureError> {
    let spec = mono_spec(constraints.sample_rate)?;
    let source = select_source(constraints);

    let fragment = (constraints.block_size * BYTES_PER_SAMPLE) as u32;
    let attr = BufferAttr {
        maxlength: u32::MAX,
        tlength: u32::MAX,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize: fragment,
    };

    info!("Requesting microphone: {}", source.as_deref().unwrap_or("default"));

    let conn = psimple::Simple::new(
        None,
        app_name,
        Direction::Record,
        source.as_deref(),
        "microphone",
        &spec,
        None,
        Some(&attr),
    )
    .map_err(classify_pulse_error)?;

    info!("Microphone acquired at {} Hz", constraints.sample_rate);

    Ok(CaptureHandle::new(Box::new(PulseCapture {
        conn: Some(conn),
        sample_rate: constraints.sample_rate,
    })))
}

/// Map a PulseAudio error onto the capture taxonomy.
pub(crate) fn classify_pulse_error(err: PAErr) -> CaptureError {
    classify_pulse_code(err.0, &format!("{:?}", err))
}

fn classify_pulse_code(code: i32, detail: &str) -> CaptureError {
    let code = code.abs();
    if code == Code::Access as i32 {
        CaptureError::PermissionDenied
    } else if code == Code::NoEntity as i32 {
        CaptureError::DeviceNotFound
    } else if code == Code::Busy as i32 {
        CaptureError::DeviceBusy
    } else {
        CaptureError::other(format!("PulseAudio error: {}", detail))
    }
}

struct PulseCapture {
    conn: Option<psimple::Simple>,
    sample_rate: u32,
}

impl CaptureStream for PulseCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, CaptureError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| CaptureError::other("capture stream stopped"))?;

        let byte_slice = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut u8, buf.len() * BYTES_PER_SAMPLE)
        };
        conn.read(byte_slice).map_err(classify_pulse_error)?;
        Ok(buf.len())
    }

    fn stop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.flush();
            debug!("Record stream closed");
        }
    }
}

struct PulseOutput {
    conn: Option<psimple::Simple>,
}

impl AudioSink for PulseOutput {
    fn write(&mut self, samples: &[f32]) -> Result<(), CaptureError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| CaptureError::other("playback stream closed"))?;

        let byte_slice = unsafe {
            std::slice::from_raw_parts(samples.as_ptr() as *const u8, samples.len() * BYTES_PER_SAMPLE)
        };
        conn.write(byte_slice).map_err(classify_pulse_error)
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.flush();
            debug!("Playback stream closed");
        }
    }
}

impl Drop for PulseOutput {
    fn drop(&mut self) {
        self.close();
    }
}
