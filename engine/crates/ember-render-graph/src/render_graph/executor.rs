//! 录制
//!
//! 每个活跃 Pass 在自己的 `GfxCommandList` 中录制，可以在 rayon 的工作线程上并行；
//! 之后按调度顺序把命令列表拼接到每个 batch 的命令缓冲。录制无序，提交严格有序。

use std::collections::HashMap;

use ember_gfx::{GfxCommandBuffer, GfxCommandList, GfxDevice, GfxError};
use itertools::Itertools;
use rayon::prelude::*;

use crate::{
    render_graph::{
        compiler::RgCompiledFrame,
        pass::{RgPassContext, RgPassExecutor},
        resource_handle::RgPassId,
    },
    stats::RgPassOutcome,
};

/// 一个 Pass 的录制结果
#[derive(Debug)]
pub struct RgRecordedPass {
    pub pass: RgPassId,
    /// barrier + debug label + 回调录制的命令
    pub list: GfxCommandList,
    pub outcome: RgPassOutcome,
}

/// 执行器
pub struct RgExecutor;

impl RgExecutor {
    /// 调用每个活跃 Pass 的回调，恰好一次
    ///
    /// `executors` 的下标为 Pass 编号；被跳过的 Pass 的回调直接丢弃。
    /// 返回值按调度顺序排列，与录制完成的先后无关。
    pub(crate) fn record<'r>(
        compiled: &RgCompiledFrame,
        executors: Vec<Box<dyn RgPassExecutor + 'r>>,
        slot_index: usize,
        parallel: bool,
    ) -> Vec<RgRecordedPass> {
        let _span = crate::profiling::rg_span!("RgExecutor::record");

        let mut executors = executors.into_iter().map(Some).collect_vec();
        let jobs = compiled
            .active_order()
            .filter_map(|pass| executors[pass.index()].take().map(|executor| (pass, executor)))
            .collect_vec();
        drop(executors);

        if parallel {
            jobs.into_par_iter()
                .map(|(pass, executor)| Self::record_pass(compiled, pass, executor, slot_index))
                .collect()
        } else {
            jobs.into_iter()
                .map(|(pass, executor)| Self::record_pass(compiled, pass, executor, slot_index))
                .collect()
        }
    }

    fn record_pass(
        compiled: &RgCompiledFrame,
        pass: RgPassId,
        executor: Box<dyn RgPassExecutor + '_>,
        slot_index: usize,
    ) -> RgRecordedPass {
        let desc = compiled.pass(pass);
        let _span = crate::profiling::rg_span!(desc.name.as_str());

        let mut ctx = RgPassContext {
            desc,
            frame_id: compiled.frame_id(),
            slot_index,
            physical: compiled.physical(),
            cmd: GfxCommandList::new(),
        };
        let result = executor.execute(&mut ctx);

        // 回调失败时丢弃它录制的命令，barrier 保留，保证后续 Pass 看到的状态一致
        let mut list = GfxCommandList::new();
        list.barrier(compiled.barriers(pass).barriers().to_vec());
        let outcome = match result {
            Ok(()) => {
                list.begin_label(desc.name.as_str()).append(ctx.cmd).end_label();
                RgPassOutcome::Executed
            }
            Err(err) => {
                log::warn!("pass '{}' failed to record in frame {}: {}", desc.name, compiled.frame_id(), err);
                RgPassOutcome::Failed(err.to_string())
            }
        };

        RgRecordedPass { pass, list, outcome }
    }

    /// 为每个 batch 分配命令缓冲，按调度顺序拼接 Pass 的命令
    ///
    /// 返回的命令缓冲与 `compiled.batches()` 一一对应。
    pub(crate) fn assemble(
        compiled: &RgCompiledFrame,
        recorded: &mut [RgRecordedPass],
        device: &dyn GfxDevice,
        slot_index: usize,
        frame_name: &str,
    ) -> Result<Vec<GfxCommandBuffer>, GfxError> {
        let _span = crate::profiling::rg_span!("RgExecutor::assemble");

        // 被跳过的 Pass 没有录制结果
        let recorded_index: HashMap<RgPassId, usize> =
            recorded.iter().enumerate().map(|(index, entry)| (entry.pass, index)).collect();

        let mut command_buffers = Vec::with_capacity(compiled.batches().len());
        for batch in compiled.batches() {
            let name = format!("{frame_name} {} #{}", batch.queue, batch.index);
            let mut cmd = device.allocate_command_buffer(slot_index, batch.queue, &name)?;
            for pass in &batch.passes {
                if let Some(&index) = recorded_index.get(pass) {
                    cmd.record(std::mem::take(&mut recorded[index].list));
                }
            }
            command_buffers.push(cmd);
        }
        Ok(command_buffers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use ember_gfx::{GfxCommand, GfxQueueClass, GfxResourceId, GfxResourceState, HeadlessDevice};

    use super::*;
    use crate::{
        config::RgConfig,
        error::RgExecuteError,
        render_graph::{
            compiler::RgCompileContext,
            pass::{RgClosureExecutor, RgPassDesc},
            resource::RgBufferDesc,
            resource_registry::RgResourceRegistry,
        },
    };

    fn closure<'r>(
        f: impl FnOnce(&mut RgPassContext<'_>) -> Result<(), RgExecuteError> + Send + 'r,
    ) -> Box<dyn RgPassExecutor + 'r> {
        Box::new(RgClosureExecutor { callback: f })
    }

    fn compile(registry: &RgResourceRegistry, device: &HeadlessDevice, passes: Vec<RgPassDesc>) -> RgCompiledFrame {
        let config = RgConfig::default();
        let ctx = RgCompileContext {
            frame_id: 3,
            registry,
            config: &config,
            device,
            transient_id_base: 1 << 48,
        };
        RgCompiledFrame::compile(passes, &ctx).unwrap()
    }

    #[test]
    fn test_recording_order_is_independent_of_completion() {
        let mut registry = RgResourceRegistry::new();
        let buffer = registry
            .import_buffer("counter", GfxResourceId(1), RgBufferDesc::new(64), GfxResourceState::Common)
            .unwrap();
        let device = HeadlessDevice::new();
        let passes = (0..8)
            .map(|i| RgPassDesc::new(format!("p{i}"), GfxQueueClass::Compute).read_write(buffer, GfxResourceState::UnorderedAccess))
            .collect_vec();
        let compiled = compile(&registry, &device, passes);

        let calls = AtomicUsize::new(0);
        let executors = (0..8u32)
            .map(|i| {
                let calls = &calls;
                closure(move |ctx| {
                    // 越早的 Pass 睡得越久
                    std::thread::sleep(std::time::Duration::from_millis((8 - i as u64) * 2));
                    calls.fetch_add(1, Ordering::SeqCst);
                    ctx.cmd().dispatch(i + 1, 1, 1);
                    Ok(())
                })
            })
            .collect_vec();

        let mut recorded = RgExecutor::record(&compiled, executors, 0, true);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        let cmds = RgExecutor::assemble(&compiled, &mut recorded, &device, 0, "[F3D]").unwrap();

        assert_eq!(cmds.len(), 1);
        let dispatches = cmds[0]
            .list()
            .commands()
            .iter()
            .filter_map(|c| match c {
                GfxCommand::Dispatch { x, .. } => Some(*x),
                _ => None,
            })
            .collect_vec();
        assert_eq!(dispatches, (1..=8).collect_vec());
        assert_eq!(cmds[0].list().labels(), (0..8).map(|i| format!("p{i}")).collect_vec());
    }

    #[test]
    fn test_failed_callback_keeps_barriers() {
        let mut registry = RgResourceRegistry::new();
        let buffer = registry
            .import_buffer("data", GfxResourceId(1), RgBufferDesc::new(64), GfxResourceState::CopyDest)
            .unwrap();
        let device = HeadlessDevice::new();
        let compiled = compile(
            &registry,
            &device,
            vec![RgPassDesc::new("broken", GfxQueueClass::Compute).write(buffer, GfxResourceState::UnorderedAccess)],
        );

        let recorded = RgExecutor::record(
            &compiled,
            vec![closure(|ctx| {
                ctx.cmd().dispatch(1, 1, 1);
                Err(RgExecuteError::Failed("pipeline not ready".to_string()))
            })],
            0,
            false,
        );
        assert_eq!(recorded[0].outcome, RgPassOutcome::Failed("pipeline not ready".to_string()));
        assert_eq!(recorded[0].list.barrier_count(), 1);
        assert!(recorded[0].list.labels().is_empty());
        assert_eq!(recorded[0].list.len(), 1);
    }

    #[test]
    fn test_skipped_pass_is_never_called() {
        let mut registry = RgResourceRegistry::new();
        let texture = registry
            .import_buffer("streamed", GfxResourceId(2), RgBufferDesc::new(64), GfxResourceState::Common)
            .unwrap();
        registry.set_resident(texture, false).unwrap();
        let device = HeadlessDevice::new();
        let compiled = compile(
            &registry,
            &device,
            vec![RgPassDesc::new("uses_streamed", GfxQueueClass::Graphics).read(texture, GfxResourceState::ConstantBuffer)],
        );

        let called = Mutex::new(false);
        let recorded = RgExecutor::record(
            &compiled,
            vec![closure(|_| {
                *called.lock().unwrap() = true;
                Ok(())
            })],
            0,
            true,
        );
        assert!(recorded.is_empty());
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_assemble_routes_passes_to_their_batches() {
        let mut registry = RgResourceRegistry::new();
        let vertices = registry
            .import_buffer("vertices", GfxResourceId(1), RgBufferDesc::new(256), GfxResourceState::Common)
            .unwrap();
        let streamed = registry
            .import_buffer("streamed", GfxResourceId(2), RgBufferDesc::new(64), GfxResourceState::Common)
            .unwrap();
        registry.set_resident(streamed, false).unwrap();
        let device = HeadlessDevice::new();
        let compiled = compile(
            &registry,
            &device,
            vec![
                RgPassDesc::new("upload", GfxQueueClass::Copy).write(vertices, GfxResourceState::CopyDest),
                RgPassDesc::new("ghost", GfxQueueClass::Graphics).read(streamed, GfxResourceState::ConstantBuffer),
                RgPassDesc::new("draw", GfxQueueClass::Graphics).read(vertices, GfxResourceState::VertexBuffer),
            ],
        );

        let executors = (0..3).map(|_| closure(|_| Ok(()))).collect_vec();
        let mut recorded = RgExecutor::record(&compiled, executors, 0, false);
        assert_eq!(recorded.len(), 2);
        let cmds = RgExecutor::assemble(&compiled, &mut recorded, &device, 0, "[F3D]").unwrap();

        assert_eq!(cmds.len(), compiled.batches().len());
        for (cmd, batch) in cmds.iter().zip(compiled.batches()) {
            assert_eq!(cmd.queue(), batch.queue);
            let expected = batch
                .passes
                .iter()
                .filter(|p| compiled.is_active(**p))
                .map(|p| compiled.pass(*p).name.clone())
                .collect_vec();
            assert_eq!(cmd.list().labels(), expected);
        }
        let labels = cmds.iter().flat_map(|c| c.list().labels()).collect_vec();
        assert_eq!(labels, vec!["upload", "draw"]);
        // 每个录制结果只被取走一次
        assert!(recorded.iter().all(|r| r.list.is_empty()));
    }
}
