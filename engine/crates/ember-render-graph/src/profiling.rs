/// 只有 Tracy client 正在运行时才创建 span
///
/// `tracy_client::span!` 在没有 client 时会 panic，测试和 headless 运行不会启动 client。
pub(crate) fn span(name: &str, file: &str, line: u32) -> Option<tracy_client::Span> {
    tracy_client::Client::running().map(|client| client.span_alloc(Some(name), name, file, line, 0))
}

macro_rules! rg_span {
    ($name:expr) => {
        $crate::profiling::span($name, file!(), line!())
    };
}

pub(crate) use rg_span;
