use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::Config;
use error::SyncError;
use events::{LayoutId, SwitchStrategy};
use services::control::{self, ControlRequest, ControlServer};
use services::{create_foreground_feed, create_keyboard_backend, AssociationTable, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "layout-sync")]
#[command(about = "Держит раскладку клавиатуры в соответствии с активным приложением")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "layout-sync.toml")]
    config: String,

    /// Режим сухого запуска (эмуляция окон и клавиатуры)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию берётся из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Запустить синхронизацию (по умолчанию)
    Run,
    /// Добавить или изменить ассоциацию приложения с раскладкой
    Add {
        /// Исполняемый файл, например code.exe
        executable: String,
        /// KLID раскладки, например 00000409
        layout: String,
    },
    /// Удалить ассоциацию
    Remove { executable: String },
    /// Показать ассоциации
    List,
    /// Показать текущую раскладку активного окна
    Current,
    /// Показать раскладки, установленные в системе
    Layouts,
    /// Переключиться на раскладку напрямую (проверка раскладки). Если синхронизация
    /// запущена, переключение выполняет она
    Test { layout: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Arc::new(Config::load(&args.config)?);

    // Инициализация системы логирования
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level)?;

    info!("Запуск layout-sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - реальные действия отключены");
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, args.dry_run).await,
        Command::Add { executable, layout } => {
            let table = AssociationTable::open(&config.associations.path);
            let layout = LayoutId::new(layout)?;
            let previous = table.put(&executable, layout.clone())?;
            table.save()?;
            match previous {
                Some(previous) => println!("{}: {} -> {}", executable, previous, layout),
                None => println!("{} → {}", executable, layout),
            }
            Ok(())
        }
        Command::Remove { executable } => {
            let table = AssociationTable::open(&config.associations.path);
            if table.remove(&executable) {
                table.save()?;
                println!("Ассоциация удалена: {}", executable);
            } else {
                println!("Ассоциация не найдена: {}", executable);
            }
            Ok(())
        }
        Command::List => {
            let table = AssociationTable::open(&config.associations.path);
            if table.is_empty() {
                println!("Ассоциаций нет ({:?})", table.path());
            }
            for (executable, layout) in table.entries() {
                println!("{} → {}", executable, layout);
            }
            Ok(())
        }
        Command::Current => {
            let backend = create_keyboard_backend(&config, args.dry_run)?;
            println!("{}", backend.probe.current_layout()?);
            Ok(())
        }
        Command::Layouts => {
            let backend = create_keyboard_backend(&config, args.dry_run)?;
            let current = backend.probe.current_layout().ok();
            for layout in backend.probe.installed_layouts()? {
                let marker = if current.as_ref() == Some(&layout) { "*" } else { " " };
                println!("{} {}", marker, layout);
            }
            Ok(())
        }
        Command::Test { layout } => test_layout(&config, LayoutId::new(layout)?, args.dry_run).await,
    }
}

async fn run(config: Arc<Config>, dry_run: bool) -> Result<()> {
    // Инициализация компонентов
    let table = Arc::new(AssociationTable::open(&config.associations.path));
    let backend = create_keyboard_backend(&config, dry_run)?;
    let engine = SyncEngine::new(table.clone(), backend, config.switching.strategy);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let feed = create_foreground_feed(config.clone(), events_tx.clone(), dry_run)?;
    let control_handle = spawn_control_server(&config, events_tx).await;

    info!("Все компоненты инициализированы");

    // Движок обрабатывает события строго по одному в выделенном потоке
    let _engine_thread = std::thread::Builder::new()
        .name("sync-engine".to_string())
        .spawn(move || engine.run_blocking(events_rx))
        .context("Не удалось запустить поток SyncEngine")?;

    let feed_handle = tokio::spawn(async move {
        if let Err(e) = feed.run().await {
            error!("Ошибка в ForegroundFeed: {}", e);
        }
    });
    let reload_handle = spawn_reload_task(table, config.associations.reload_interval_ms);

    info!("Все сервисы запущены");

    // Ожидание сигнала завершения
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Получен сигнал завершения (Ctrl+C)");
        }
        Err(err) => {
            error!("Ошибка при ожидании сигнала завершения: {}", err);
        }
    }

    info!("Завершение работы...");

    feed_handle.abort();
    if let Some(handle) = &reload_handle {
        handle.abort();
    }
    if let Some(handle) = &control_handle {
        handle.abort();
    }

    // Ожидаем завершения задач (с таймаутом)
    let shutdown_timeout = Duration::from_secs(5);
    let shutdown_result = tokio::time::timeout(shutdown_timeout, async {
        let _ = feed_handle.await;
        if let Some(handle) = reload_handle {
            let _ = handle.await;
        }
        if let Some(handle) = control_handle {
            let _ = handle.await;
        }
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("Все сервисы завершили работу корректно"),
        Err(_) => warn!("Таймаут при завершении сервисов"),
    }

    info!("layout-sync завершил работу");
    Ok(())
}

/// Ручное переключение. Запущенной синхронизации запрос передаётся по каналу
/// управления, чтобы она перебазировалась и не вернула раскладку на следующем
/// событии. Без неё переключение выполняется локально.
async fn test_layout(config: &Config, layout: LayoutId, dry_run: bool) -> Result<()> {
    if config.control.enabled {
        let request = ControlRequest::Switch {
            layout: layout.clone(),
            strategy: SwitchStrategy::Direct,
        };
        match control::send_request(config.control.address, &request).await {
            Ok(response) => {
                println!("{}", response.message);
                if !response.ok {
                    warn!("Раскладка после переключения не совпала с запрошенной");
                }
                return Ok(());
            }
            Err(SyncError::ServiceUnavailable(reason)) => {
                info!("Синхронизация не запущена ({}), переключение выполняется локально", reason);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let table = Arc::new(AssociationTable::open(&config.associations.path));
    let backend = create_keyboard_backend(config, dry_run)?;
    let mut engine = SyncEngine::new(table, backend, config.switching.strategy);
    let status = engine.request_switch(layout, SwitchStrategy::Direct);
    println!("{}", status);
    Ok(())
}

/// Канал управления для CLI; его отсутствие не мешает синхронизации
async fn spawn_control_server(
    config: &Config,
    commands: mpsc::UnboundedSender<events::EngineCommand>,
) -> Option<JoinHandle<()>> {
    if !config.control.enabled {
        info!("Канал управления отключён");
        return None;
    }

    match ControlServer::bind(config.control.address, commands).await {
        Ok(server) => Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Ошибка в канале управления: {}", e);
            }
        })),
        Err(e) => {
            warn!("{}. Команда test не сможет обратиться к этому экземпляру", e);
            None
        }
    }
}

/// Периодически перечитывает файл ассоциаций, если он изменился на диске
fn spawn_reload_task(table: Arc<AssociationTable>, interval_ms: u64) -> Option<JoinHandle<()>> {
    if interval_ms == 0 {
        info!("Горячая перезагрузка ассоциаций отключена");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            table.reload_if_changed();
        }
    }))
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    Ok(())
}
