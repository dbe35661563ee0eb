use super::{BackendMetadata, DiffusionBackend, DiffusionPipeline, GenerationRequest, LoadRequest};
use crate::checkpoints::Resolution;
use crate::errors::{BenchError, BenchResult};
use crate::memory::{CounterProbe, MemoryProbe, MemoryTracker};
use crate::variants::PipelineVariant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const DEFAULT_WEIGHTS_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_AUXILIARY_BYTES: u64 = 700 * 1024 * 1024;
const DEFAULT_STEP_LATENCY: Duration = Duration::from_millis(5);

/// A call the mock backend received, recorded for assertions
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Load(LoadRequest),
    Compile,
    Generate {
        prompt: String,
        batch_size: usize,
        num_inference_steps: usize,
        image: Option<(u32, u32)>,
        mask_image: Option<(u32, u32)>,
        control_image: Option<(u32, u32)>,
    },
    Flush,
}

/// A backend that simulates inference: memory is an accounting counter and
/// every denoising step sleeps for a fixed latency
#[derive(Clone)]
pub struct MockBackend {
    allocated: Arc<AtomicU64>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    step_latency: Duration,
    total_memory: Option<u64>,
    fail_generation: Option<String>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            allocated: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            step_latency: DEFAULT_STEP_LATENCY,
            total_memory: Some(24 * 1024 * 1024 * 1024),
            fail_generation: None,
        }
    }

    pub fn metadata() -> BackendMetadata {
        BackendMetadata {
            name: "mock",
            description: "Simulated pipelines with memory accounting, for tests and dry runs",
            variants: PipelineVariant::ALL.to_vec(),
        }
    }

    pub fn with_step_latency(mut self, step_latency: Duration) -> Self {
        self.step_latency = step_latency;
        self
    }

    pub fn with_total_memory(mut self, total_memory: Option<u64>) -> Self {
        self.total_memory = total_memory;
        self
    }

    /// Make every generate call fail with the given message
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.fail_generation = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::SeqCst)
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DiffusionBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn load(&self, request: &LoadRequest) -> BenchResult<Box<dyn DiffusionPipeline>> {
        self.record(MockCall::Load(request.clone()));

        let mut held = DEFAULT_WEIGHTS_BYTES;
        if request.auxiliary_checkpoint.is_some() {
            held += DEFAULT_AUXILIARY_BYTES;
        }
        self.allocated.fetch_add(held, Ordering::SeqCst);
        tracing::debug!(
            "mock: loaded {} ({} bytes held)",
            request.checkpoint,
            held
        );

        Ok(Box::new(MockPipeline {
            class_name: request.pipeline_class_name().to_string(),
            resolution: request.resolution,
            backend: self.clone(),
            held,
        }))
    }

    fn memory_probe(&self) -> BenchResult<Box<dyn MemoryProbe>> {
        Ok(Box::new(CounterProbe::new(self.allocated.clone())))
    }

    fn total_memory_bytes(&self) -> Option<u64> {
        self.total_memory
    }

    fn flush(&self) {
        self.record(MockCall::Flush);
    }
}

struct MockPipeline {
    class_name: String,
    resolution: Resolution,
    backend: MockBackend,
    held: u64,
}

impl MockPipeline {
    /// Latents plus decoded images for a batch, in f32
    fn activation_bytes(&self, batch_size: usize) -> u64 {
        let pixels = self.resolution.width as u64 * self.resolution.height as u64;
        let latents = pixels / 64 * 4 * 4 * 2;
        let decoded = pixels * 3 * 4;
        batch_size as u64 * (latents + decoded)
    }
}

impl DiffusionPipeline for MockPipeline {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn compile(&mut self) -> BenchResult<()> {
        self.backend.record(MockCall::Compile);
        Ok(())
    }

    fn generate(
        &mut self,
        request: &GenerationRequest<'_>,
        tracker: &mut MemoryTracker,
    ) -> BenchResult<()> {
        let cond = request.conditioning;
        self.backend.record(MockCall::Generate {
            prompt: cond.prompt.clone(),
            batch_size: request.batch_size,
            num_inference_steps: request.num_inference_steps,
            image: cond.image.as_ref().map(|i| i.dimensions()),
            mask_image: cond.mask_image.as_ref().map(|i| i.dimensions()),
            control_image: cond.control_image.as_ref().map(|i| i.dimensions()),
        });

        if let Some(message) = &self.backend.fail_generation {
            return Err(BenchError::OutOfMemory(message.clone()));
        }

        let activations = self.activation_bytes(request.batch_size);
        self.backend
            .allocated
            .fetch_add(activations, Ordering::SeqCst);
        for _ in 0..request.num_inference_steps {
            thread::sleep(self.backend.step_latency);
            tracker.sample();
        }
        self.backend
            .allocated
            .fetch_sub(activations, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockPipeline {
    fn drop(&mut self) {
        self.backend.allocated.fetch_sub(self.held, Ordering::SeqCst);
    }
}
