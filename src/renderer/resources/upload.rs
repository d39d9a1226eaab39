use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Largest payload `vkCmdUpdateBuffer` accepts in one call
pub const MAX_INLINE_UPDATE_BYTES: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// The pipeline stage and access mask of the first reader of uploaded data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumer {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl Consumer {
    pub const VERTEX_INPUT: Self = Self {
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
        access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
    };
    pub const INDEX_INPUT: Self = Self {
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
        access: vk::AccessFlags::INDEX_READ,
    };

    pub fn uniform(stages: vk::PipelineStageFlags) -> Self {
        Self {
            stage: stages,
            access: vk::AccessFlags::UNIFORM_READ,
        }
    }
}

/// Buffer transfer commands. Implemented over a real command buffer and by test doubles.
pub trait TransferRecorder {
    fn buffer_barrier(&mut self, barrier: BufferBarrier);
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: u64);
    fn update_buffer(&mut self, dst: vk::Buffer, data: &[u8]);
}

/// Records into a command buffer that is already in the recording state
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }
}

impl TransferRecorder for CommandRecorder<'_> {
    fn buffer_barrier(&mut self, barrier: BufferBarrier) {
        let buffer_barrier = vk::BufferMemoryBarrier::default()
            .buffer(barrier.buffer)
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[buffer_barrier],
                &[],
            );
        }
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(self.cmd, src, dst, &[region]);
        }
    }

    fn update_buffer(&mut self, dst: vk::Buffer, data: &[u8]) {
        unsafe {
            self.device.cmd_update_buffer(self.cmd, dst, 0, data);
        }
    }
}

/// Staging-to-device copy. The leading barrier waits for earlier readers of `dst`,
/// the trailing one makes the copy visible to `consumer`.
pub fn record_bulk_upload(
    rec: &mut impl TransferRecorder,
    staging: vk::Buffer,
    dst: vk::Buffer,
    size: u64,
    consumer: Consumer,
) {
    rec.buffer_barrier(BufferBarrier {
        buffer: dst,
        src_stage: consumer.stage,
        src_access: vk::AccessFlags::empty(),
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    });
    rec.copy_buffer(staging, dst, size);
    rec.buffer_barrier(BufferBarrier {
        buffer: dst,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_stage: consumer.stage,
        dst_access: consumer.access,
    });
}

/// One long-lived uniform buffer and the bytes it receives this frame
#[derive(Debug, Clone, Copy)]
pub struct UniformUpload<'a> {
    pub buffer: vk::Buffer,
    pub stages: vk::PipelineStageFlags,
    pub bytes: &'a [u8],
}

/// In-place uniform update bracketed by a demote (uniform read -> transfer write)
/// and a promote (transfer write -> uniform read) barrier.
pub fn record_uniform_update(
    rec: &mut impl TransferRecorder,
    upload: &UniformUpload,
) -> Result<()> {
    if upload.bytes.is_empty()
        || upload.bytes.len() > MAX_INLINE_UPDATE_BYTES
        || upload.bytes.len() % 4 != 0
    {
        return Err(eyre!(
            "Uniform update of {} bytes cannot be recorded inline",
            upload.bytes.len()
        ));
    }

    let consumer = Consumer::uniform(upload.stages);
    rec.buffer_barrier(BufferBarrier {
        buffer: upload.buffer,
        src_stage: consumer.stage,
        src_access: consumer.access,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    });
    rec.update_buffer(upload.buffer, upload.bytes);
    rec.buffer_barrier(BufferBarrier {
        buffer: upload.buffer,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_stage: consumer.stage,
        dst_access: consumer.access,
    });
    Ok(())
}

pub fn record_uniform_updates(
    rec: &mut impl TransferRecorder,
    uploads: &[UniformUpload],
) -> Result<()> {
    for upload in uploads {
        record_uniform_update(rec, upload)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum TransferOp {
        Barrier(BufferBarrier),
        Copy { src: vk::Buffer, dst: vk::Buffer, size: u64 },
        Update { dst: vk::Buffer, len: usize },
    }

    #[derive(Default)]
    pub(crate) struct TraceRecorder {
        pub ops: Vec<TransferOp>,
    }

    impl TransferRecorder for TraceRecorder {
        fn buffer_barrier(&mut self, barrier: BufferBarrier) {
            self.ops.push(TransferOp::Barrier(barrier));
        }

        fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: u64) {
            self.ops.push(TransferOp::Copy { src, dst, size });
        }

        fn update_buffer(&mut self, dst: vk::Buffer, data: &[u8]) {
            self.ops.push(TransferOp::Update { dst, len: data.len() });
        }
    }

    fn is_demote(b: &BufferBarrier) -> bool {
        b.src_access == vk::AccessFlags::UNIFORM_READ
            && b.dst_access == vk::AccessFlags::TRANSFER_WRITE
    }

    fn is_promote(b: &BufferBarrier) -> bool {
        b.src_access == vk::AccessFlags::TRANSFER_WRITE
            && b.dst_access == vk::AccessFlags::UNIFORM_READ
    }

    #[test]
    fn bulk_upload_is_fenced_by_barriers_on_both_sides() {
        let staging = vk::Buffer::from_raw(1);
        let dst = vk::Buffer::from_raw(2);
        let mut rec = TraceRecorder::default();

        record_bulk_upload(&mut rec, staging, dst, 256, Consumer::INDEX_INPUT);

        assert_eq!(rec.ops.len(), 3);
        match &rec.ops[0] {
            TransferOp::Barrier(b) => {
                assert_eq!(b.buffer, dst);
                assert_eq!(b.dst_access, vk::AccessFlags::TRANSFER_WRITE);
                assert_eq!(b.dst_stage, vk::PipelineStageFlags::TRANSFER);
            }
            op => panic!("expected leading barrier, got {op:?}"),
        }
        assert_eq!(rec.ops[1], TransferOp::Copy { src: staging, dst, size: 256 });
        match &rec.ops[2] {
            TransferOp::Barrier(b) => {
                assert_eq!(b.src_access, vk::AccessFlags::TRANSFER_WRITE);
                assert_eq!(b.dst_access, vk::AccessFlags::INDEX_READ);
                assert_eq!(b.dst_stage, vk::PipelineStageFlags::VERTEX_INPUT);
            }
            op => panic!("expected trailing barrier, got {op:?}"),
        }
    }

    #[test]
    fn every_uniform_buffer_gets_one_demote_and_one_promote_per_frame() {
        let payload = [0u8; 64];
        let uploads: Vec<UniformUpload> = (1..=5)
            .map(|raw| UniformUpload {
                buffer: vk::Buffer::from_raw(raw),
                stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
                bytes: &payload,
            })
            .collect();
        let mut rec = TraceRecorder::default();

        record_uniform_updates(&mut rec, &uploads).unwrap();

        for upload in &uploads {
            let ops: Vec<&TransferOp> = rec
                .ops
                .iter()
                .filter(|op| match op {
                    TransferOp::Barrier(b) => b.buffer == upload.buffer,
                    TransferOp::Update { dst, .. } => *dst == upload.buffer,
                    TransferOp::Copy { .. } => false,
                })
                .collect();
            assert_eq!(ops.len(), 3, "{:?}", upload.buffer);
            assert!(matches!(ops[0], TransferOp::Barrier(b) if is_demote(b)));
            assert!(matches!(ops[1], TransferOp::Update { len: 64, .. }));
            assert!(matches!(ops[2], TransferOp::Barrier(b) if is_promote(b)));
        }
    }

    #[test]
    fn promote_targets_the_consuming_stages() {
        let payload = [0u8; 16];
        let stages = vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        let mut rec = TraceRecorder::default();
        record_uniform_update(&mut rec, &UniformUpload {
            buffer: vk::Buffer::from_raw(9),
            stages,
            bytes: &payload,
        })
        .unwrap();

        let TransferOp::Barrier(demote) = &rec.ops[0] else { panic!() };
        let TransferOp::Barrier(promote) = &rec.ops[2] else { panic!() };
        assert_eq!(demote.src_stage, stages);
        assert_eq!(promote.dst_stage, stages);
    }

    #[test]
    fn oversized_or_unaligned_updates_are_rejected() {
        let mut rec = TraceRecorder::default();
        let big = vec![0u8; MAX_INLINE_UPDATE_BYTES + 4];
        let odd = [0u8; 6];
        for bytes in [&big[..], &odd[..], &[][..]] {
            let upload = UniformUpload {
                buffer: vk::Buffer::from_raw(3),
                stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
                bytes,
            };
            assert!(record_uniform_update(&mut rec, &upload).is_err());
        }
        assert!(rec.ops.is_empty());
    }
}
