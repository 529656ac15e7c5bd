//! Mesh worker pool: one thread per view triangulates that view's buffers
//! for the oldest frame still missing its result, and a submit thread
//! assembles the finished frame once every view has completed.
//!
//! Direct port of `worker.hpp`/`worker.cpp`'s two-`Mutex`/two-`Condvar`
//! design; the raw-pointer `WorkerFrame*` queues become `VecDeque`s behind
//! `Mutex`, and the original's "unlock during triangulate" optimization is
//! preserved by cloning the one view's input out of the frame before the
//! view's lock is dropped for the computation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use depth_stream_encoder::EncoderFrame;
use depth_stream_mesh::{Generator, ViewBuffers};
use depth_stream_proto::{Index, Matrix, MeshSettings, ViewMetadata, Vertex, VIEW_COUNT_MAX};

/// One frame in flight through the mesh worker pool: one entry per view,
/// filled in by that view's thread as it completes.
pub struct WorkerFrame {
    id: u64,
    pub request_id: u32,
    pub layer_index: u32,
    pub view_buffers: [ViewBuffers; VIEW_COUNT_MAX],
    pub view_matrices: [Matrix; VIEW_COUNT_MAX],
    pub encoder_frame: EncoderFrame,
    vertices: [Vec<Vertex>; VIEW_COUNT_MAX],
    indices: [Vec<Index>; VIEW_COUNT_MAX],
    view_metadata: Vec<Option<ViewMetadata>>,
    complete: [bool; VIEW_COUNT_MAX],
}

impl WorkerFrame {
    /// `view_count` views beyond the session's requested count start
    /// pre-marked complete, so `worker_mesh` never claims them and
    /// `worker_submit` emits empty slots for them without extra branching.
    pub fn new(
        request_id: u32,
        layer_index: u32,
        view_count: u32,
        view_buffers: [ViewBuffers; VIEW_COUNT_MAX],
        view_matrices: [Matrix; VIEW_COUNT_MAX],
        encoder_frame: EncoderFrame,
    ) -> Self {
        Self {
            id: next_frame_id(),
            request_id,
            layer_index,
            view_buffers,
            view_matrices,
            encoder_frame,
            vertices: Default::default(),
            indices: Default::default(),
            view_metadata: vec![None; VIEW_COUNT_MAX],
            complete: std::array::from_fn(|view| view >= view_count as usize),
        }
    }
}

fn next_frame_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// One fully-triangulated, fully-encoded layer ready to leave the worker
/// pool for the wire.
pub struct SubmittedLayer {
    pub request_id: u32,
    pub layer_index: u32,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
    pub view_metadata: Vec<ViewMetadata>,
    pub view_matrices: [Matrix; VIEW_COUNT_MAX],
    pub vertex_counts: [u32; VIEW_COUNT_MAX],
    pub index_counts: [u32; VIEW_COUNT_MAX],
    pub image: Vec<u8>,
}

struct Shared {
    input: Mutex<VecDeque<WorkerFrame>>,
    input_condition: Condvar,
    mesh_condition: Condvar,
    output: Mutex<VecDeque<SubmittedLayer>>,
    active: AtomicBool,
    /// Versioned so each view thread can tell "there is an update I haven't
    /// applied yet" independently, rather than one thread's `.take()`
    /// starving the other five.
    mesh_settings: Mutex<(u64, MeshSettings)>,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    mesh_threads: Vec<JoinHandle<()>>,
    submit_thread: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `VIEW_COUNT_MAX` mesh threads, each taking ownership of one
    /// view's generator, plus one submit thread.
    pub fn create(generators: [Box<dyn Generator + Send>; VIEW_COUNT_MAX], mesh_settings: MeshSettings) -> Self {
        let shared = Arc::new(Shared {
            input: Mutex::new(VecDeque::new()),
            input_condition: Condvar::new(),
            mesh_condition: Condvar::new(),
            output: Mutex::new(VecDeque::new()),
            active: AtomicBool::new(true),
            mesh_settings: Mutex::new((0, mesh_settings)),
        });

        let mesh_threads = generators
            .into_iter()
            .enumerate()
            .map(|(view, generator)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("mesh-view-{view}"))
                    .spawn(move || worker_mesh(view, generator, shared))
                    .expect("failed to spawn mesh worker thread")
            })
            .collect();

        let submit_thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("mesh-submit".to_string())
                .spawn(move || worker_submit(shared))
                .expect("failed to spawn submit worker thread")
        };

        Self {
            shared,
            mesh_threads,
            submit_thread: Some(submit_thread),
        }
    }

    /// Publishes new mesh settings for every view's generator to pick up
    /// before its next triangulate call.
    pub fn set_mesh_settings(&self, settings: MeshSettings) {
        let mut mesh_settings = self.shared.mesh_settings.lock().expect("worker pool mesh settings mutex poisoned");
        mesh_settings.0 += 1;
        mesh_settings.1 = settings;
    }

    /// Enqueues a frame for triangulation. Views race to claim it; the
    /// submit thread picks it up once every view has completed.
    pub fn submit(&self, frame: WorkerFrame) {
        let mut input = self.shared.input.lock().expect("worker pool input mutex poisoned");
        input.push_back(frame);
        self.shared.input_condition.notify_all();
    }

    /// Drains whatever finished layers are waiting, without blocking.
    pub fn reclaim(&self) -> Vec<SubmittedLayer> {
        let mut output = self.shared.output.lock().expect("worker pool output mutex poisoned");
        output.drain(..).collect()
    }

    /// Stops all workers and returns the `(request_id, layer_index)` of
    /// every frame still in flight, so the caller can release those
    /// frame-pool slots.
    pub fn destroy(mut self) -> Vec<(u32, u32)> {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.input_condition.notify_all();
        self.shared.mesh_condition.notify_all();

        for thread in self.mesh_threads.drain(..) {
            let _ = thread.join();
        }
        if let Some(thread) = self.submit_thread.take() {
            let _ = thread.join();
        }

        let mut abandoned = Vec::new();
        let input = self.shared.input.lock().expect("worker pool input mutex poisoned");
        abandoned.extend(input.iter().map(|frame| (frame.request_id, frame.layer_index)));
        drop(input);

        let mut output = self.shared.output.lock().expect("worker pool output mutex poisoned");
        abandoned.extend(output.drain(..).map(|layer| (layer.request_id, layer.layer_index)));

        abandoned
    }
}

fn worker_mesh(view: usize, mut generator: Box<dyn Generator + Send>, shared: Arc<Shared>) {
    let mut applied_version = 0u64;

    loop {
        let mut input = shared.input.lock().expect("worker pool input mutex poisoned");

        let claim = loop {
            let found = input
                .iter()
                .find(|frame| !frame.complete[view])
                .map(|frame| (frame.id, frame.view_buffers[view].clone(), frame.view_matrices[view]));

            if let Some(claim) = found {
                break claim;
            }
            if !shared.active.load(Ordering::SeqCst) {
                return;
            }
            input = shared
                .input_condition
                .wait(input)
                .expect("worker pool input condition wait poisoned");
        };
        drop(input);

        {
            let mesh_settings = shared.mesh_settings.lock().expect("worker pool mesh settings mutex poisoned");
            if mesh_settings.0 != applied_version {
                generator.apply(&mesh_settings.1);
                applied_version = mesh_settings.0;
            }
        }

        let (id, view_buffers, _view_matrix) = claim;
        let mut metadata = depth_stream_proto::ViewMetadata::empty(depth_stream_proto::MeshGeneratorKind::Loop);
        let mesh = generator.triangulate(&view_buffers, &mut metadata);

        let mut input = shared.input.lock().expect("worker pool input mutex poisoned");
        if let Some(frame) = input.iter_mut().find(|frame| frame.id == id) {
            match mesh {
                Ok(mesh) => {
                    frame.vertices[view] = mesh.vertices;
                    frame.indices[view] = mesh.indices;
                }
                Err(error) => {
                    tracing::error!(view, %error, "mesh generator failed; submitting an empty view");
                }
            }
            frame.view_metadata[view] = Some(metadata);
            frame.complete[view] = true;
        }
        shared.mesh_condition.notify_all();
        drop(input);
    }
}

fn worker_submit(shared: Arc<Shared>) {
    loop {
        let mut input = shared.input.lock().expect("worker pool input mutex poisoned");

        loop {
            if let Some(frame) = input.front() {
                if frame.complete.iter().all(|&done| done) {
                    break;
                }
            }
            if !shared.active.load(Ordering::SeqCst) {
                return;
            }
            input = shared
                .mesh_condition
                .wait(input)
                .expect("worker pool mesh condition wait poisoned");
        }

        let frame = input.pop_front().expect("front frame checked complete above");
        drop(input);

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut vertex_counts = [0u32; VIEW_COUNT_MAX];
        let mut index_counts = [0u32; VIEW_COUNT_MAX];
        let mut view_metadata = Vec::with_capacity(VIEW_COUNT_MAX);

        for view in 0..VIEW_COUNT_MAX {
            vertex_counts[view] = frame.vertices[view].len() as u32;
            index_counts[view] = frame.indices[view].len() as u32;
            vertices.extend_from_slice(&frame.vertices[view]);
            indices.extend_from_slice(&frame.indices[view]);
            view_metadata.push(frame.view_metadata[view].unwrap_or_else(|| {
                depth_stream_proto::ViewMetadata::empty(depth_stream_proto::MeshGeneratorKind::Loop)
            }));
        }

        let image = frame.encoder_frame.data.clone();

        let layer = SubmittedLayer {
            request_id: frame.request_id,
            layer_index: frame.layer_index,
            vertices,
            indices,
            view_metadata,
            view_matrices: frame.view_matrices,
            vertex_counts,
            index_counts,
            image,
        };

        let mut output = shared.output.lock().expect("worker pool output mutex poisoned");
        output.push_back(layer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depth_stream_mesh::QuadGenerator;
    use depth_stream_proto::{MeshGeneratorKind, MeshGeneratorSettings, VideoCodec};

    fn empty_view_buffers() -> ViewBuffers {
        ViewBuffers {
            resolution: (2, 2),
            depth: vec![0.0; 4],
            normal: vec![[0.0, 0.0]; 4],
            object_id: vec![0; 4],
        }
    }

    fn test_generators() -> [Box<dyn Generator + Send>; VIEW_COUNT_MAX] {
        std::array::from_fn(|_| Box::new(QuadGenerator::default()) as Box<dyn Generator + Send>)
    }

    #[test]
    fn a_submitted_frame_completes_through_every_worker() {
        let mesh_settings = MeshSettings::new(MeshGeneratorSettings::default_for(MeshGeneratorKind::Quad));
        let pool = WorkerPool::create(test_generators(), mesh_settings);

        let frame = WorkerFrame::new(
            1,
            0,
            VIEW_COUNT_MAX as u32,
            std::array::from_fn(|_| empty_view_buffers()),
            [depth_stream_proto::IDENTITY_MATRIX; VIEW_COUNT_MAX],
            EncoderFrame {
                data: vec![1, 2, 3],
                time_encode: 0.0,
            },
        );
        pool.submit(frame);

        let mut layers = Vec::new();
        for _ in 0..200 {
            layers = pool.reclaim();
            if !layers.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].request_id, 1);
        assert_eq!(layers[0].image, vec![1, 2, 3]);

        let abandoned = pool.destroy();
        assert!(abandoned.is_empty());
        let _ = VideoCodec::H264;
    }

    #[test]
    fn a_session_with_fewer_views_leaves_the_rest_empty() {
        let mesh_settings = MeshSettings::new(MeshGeneratorSettings::default_for(MeshGeneratorKind::Quad));
        let pool = WorkerPool::create(test_generators(), mesh_settings);

        let frame = WorkerFrame::new(
            1,
            0,
            1,
            std::array::from_fn(|_| empty_view_buffers()),
            [depth_stream_proto::IDENTITY_MATRIX; VIEW_COUNT_MAX],
            EncoderFrame {
                data: vec![9],
                time_encode: 0.0,
            },
        );
        pool.submit(frame);

        let mut layers = Vec::new();
        for _ in 0..200 {
            layers = pool.reclaim();
            if !layers.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert_eq!(layers.len(), 1);
        for view in 1..VIEW_COUNT_MAX {
            assert_eq!(layers[0].vertex_counts[view], 0);
            assert_eq!(layers[0].index_counts[view], 0);
        }

        let abandoned = pool.destroy();
        assert!(abandoned.is_empty());
    }
}
