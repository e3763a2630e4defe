use crate::pipeline::LogPipeline;
use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Конфигурация слоя логирования.
///
/// Управляет тем, какие события попадают в pipeline, и нужно ли
/// дополнительно печатать логи в консоль через `fmt`‑слой.
///
/// **Поля**
/// - `max_level`: самый «подробный» уровень, который ещё сохраняется
///   (по умолчанию `TRACE`, то есть всё).
/// - `enable_stdout`: если `true`, поверх [`LogSinkLayer`] добавляется
///   `tracing_subscriber::fmt::Layer` и события печатаются в консоль.
///
/// [`LogSinkLayer`]: crate::layer::LogSinkLayer
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub max_level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            max_level: Level::TRACE,
            enable_stdout: true,
        }
    }
}

/// Initialize global `tracing` subscriber feeding `pipeline`.
///
/// **Parameters**
/// - `pipeline`: [`LogPipeline`], который получает события в виде
///   [`LogRecord`](crate::record::LogRecord).
/// - `config`: [`LayerConfig`] с фильтром уровня и флагом консоли.
///
/// **Errors**
///
/// Возвращает ошибку, если глобальный subscriber уже установлен.
pub fn init_tracing_with_config(
    pipeline: &LogPipeline,
    config: LayerConfig,
) -> Result<(), SetGlobalDefaultError> {
    let layer = pipeline.layer().with_max_level(config.max_level);

    // Для совместимости типов собираем subscriber в двух вариантах.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`]. This is the recommended entrypoint for
/// typical services.
pub fn init_tracing(pipeline: &LogPipeline) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(pipeline, LayerConfig::default())
}
