//! 模拟纹理流式加载
//!
//! 主线程通过 `request` 发送加载请求，后台的 "Residency-Streamer" 线程模拟 IO 延迟，
//! 完成后把结果发回主线程；主线程每帧调用 `drain` 收集结果并更新驻留状态。
//!
//! # 线程生命周期
//! 后台线程的生命周期与 `ResidencyStreamer` 绑定：Drop 时关闭请求 channel，
//! 后台线程的 `recv()` 返回错误后退出，随后被 join。

use std::{thread, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use ember_render_graph::RgResourceHandle;

pub struct StreamRequest {
    pub handle: RgResourceHandle,
    pub name: String,
    /// 模拟的 IO + 解码耗时
    pub latency: Duration,
}

/// 加载完成的资源
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEvent {
    pub handle: RgResourceHandle,
    pub name: String,
}

pub struct ResidencyStreamer {
    request_sender: Option<Sender<StreamRequest>>,
    event_receiver: Receiver<StreamEvent>,

    stream_thread: Option<thread::JoinHandle<()>>,
    in_flight: usize,
}

// new & init
impl ResidencyStreamer {
    pub fn new() -> std::io::Result<Self> {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<StreamRequest>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<StreamEvent>();

        let stream_thread = thread::Builder::new().name("Residency-Streamer".to_string()).spawn(move || {
            while let Ok(req) = req_rx.recv() {
                let _span = tracy_client::Client::running().map(|client| {
                    client.span(tracy_client::span_location!("ResidencyStreamer::load"), 0)
                });

                thread::sleep(req.latency);
                log::debug!("streamed '{}' in {:?}", req.name, req.latency);
                if event_tx
                    .send(StreamEvent {
                        handle: req.handle,
                        name: req.name,
                    })
                    .is_err()
                {
                    break;
                }
            }
        })?;

        Ok(Self {
            request_sender: Some(req_tx),
            event_receiver: event_rx,
            stream_thread: Some(stream_thread),
            in_flight: 0,
        })
    }
}

// getters
impl ResidencyStreamer {
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

// update
impl ResidencyStreamer {
    pub fn request(&mut self, req: StreamRequest) {
        let Some(sender) = &self.request_sender else {
            return;
        };
        let handle = req.handle;
        match sender.send(req) {
            Ok(()) => self.in_flight += 1,
            Err(e) => log::error!("failed to send stream request for {:?}: {}", handle, e),
        }
    }

    /// 取出所有已经完成的加载，不阻塞
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let events = self.event_receiver.try_iter().collect::<Vec<_>>();
        self.in_flight = self.in_flight.saturating_sub(events.len());
        events
    }

    /// 阻塞等待下一个完成的加载
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<StreamEvent> {
        let event = self.event_receiver.recv_timeout(timeout).ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(event)
    }
}

impl Drop for ResidencyStreamer {
    fn drop(&mut self) {
        // 必须先关闭 sender，否则后台线程的 recv 会一直阻塞
        self.request_sender = None;
        if let Some(stream_thread) = self.stream_thread.take()
            && stream_thread.join().is_err()
        {
            log::error!("residency streamer thread panicked");
        }
    }
}
