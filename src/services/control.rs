//! Control channel of a running instance.
//!
//! The CLI connects over loopback TCP and sends one length-prefixed JSON request.
//! The server pushes it into the same queue the foreground feed uses and answers
//! with the status the engine produced, so a manual switch rebases the live
//! engine and is not undone by the next foreground event.

use crate::debug_if_enabled;
use crate::error::Result;
use crate::events::{EngineCommand, LayoutId, SwitchStrategy};
use crate::sync_error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Максимальный размер сообщения (защита от мусора на порту)
const MAX_MESSAGE_LEN: usize = 64 * 1024;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Switch {
        layout: LayoutId,
        strategy: SwitchStrategy,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Раскладка после запроса совпала с запрошенной
    pub ok: bool,
    pub message: String,
}

impl ControlResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

pub struct ControlServer {
    listener: TcpListener,
    commands: UnboundedSender<EngineCommand>,
}

impl ControlServer {
    pub async fn bind(address: SocketAddr, commands: UnboundedSender<EngineCommand>) -> Result<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            sync_error!(
                service_unavailable,
                "не удалось открыть канал управления {}: {}",
                address,
                e
            )
        })?;

        info!("Канал управления слушает {}", listener.local_addr()?);
        Ok(Self { listener, commands })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Принимает подключения, пока задача не будет отменена
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug_if_enabled!("Подключение к каналу управления: {}", peer);

            let commands = self.commands.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, commands).await {
                    warn!("Ошибка канала управления ({}): {}", peer, e);
                }
            });
        }
    }
}

/// Отправляет запрос работающему экземпляру. `ServiceUnavailable` означает, что
/// экземпляр не запущен.
pub async fn send_request(address: SocketAddr, request: &ControlRequest) -> Result<ControlResponse> {
    let mut stream = match timeout(IO_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(sync_error!(
                service_unavailable,
                "работающий экземпляр не найден на {}: {}",
                address,
                e
            ))
        }
        Err(_) => {
            return Err(sync_error!(
                service_unavailable,
                "таймаут подключения к {}",
                address
            ))
        }
    };

    let exchange = async {
        write_message(&mut stream, request).await?;
        read_message::<ControlResponse>(&mut stream).await
    };

    timeout(IO_TIMEOUT, exchange)
        .await
        .map_err(|_| sync_error!(internal, "таймаут ответа от {}", address))?
}

async fn handle_client(mut stream: TcpStream, commands: UnboundedSender<EngineCommand>) -> Result<()> {
    let request = timeout(IO_TIMEOUT, read_message::<ControlRequest>(&mut stream))
        .await
        .map_err(|_| sync_error!(internal, "таймаут чтения запроса"))??;

    let response = dispatch(request, &commands).await;
    write_message(&mut stream, &response).await
}

async fn dispatch(request: ControlRequest, commands: &UnboundedSender<EngineCommand>) -> ControlResponse {
    match request {
        ControlRequest::Switch { layout, strategy } => {
            info!("Запрошено ручное переключение на {} ({})", layout, strategy);

            let (command, reply) = EngineCommand::switch(layout, strategy);
            if commands.send(command).is_err() {
                return ControlResponse::failed("движок синхронизации остановлен");
            }

            match reply.await {
                Ok(status) => ControlResponse {
                    ok: status.landed(),
                    message: status.to_string(),
                },
                Err(_) => ControlResponse::failed("движок не вернул результат"),
            }
        }
    }
}

async fn read_message<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    let len = stream.read_u32_le().await? as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(sync_error!(internal, "слишком длинное сообщение: {} байт", len));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

async fn write_message<T: Serialize>(stream: &mut TcpStream, message: &T) -> Result<()> {
    let json = serde_json::to_vec(message)?;
    stream.write_u32_le(json.len() as u32).await?;
    stream.write_all(&json).await?;
    stream.flush().await?;
    Ok(())
}
