use crate::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Debug)]
pub struct MessageSender<T>(pub(crate) mpsc::Sender<T>);
#[derive(Debug)]
pub struct MessageReceiver<T>(mpsc::Receiver<T>);

pub fn message_channel<T>(size: usize) -> (MessageSender<T>, MessageReceiver<T>) {
    let (tx, rx) = mpsc::channel(size);
    (MessageSender(tx), MessageReceiver(rx))
}

impl<T> MessageReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> MessageSender<T> {
    pub async fn send(&self, msg: T) -> Result {
        self.0.send(msg).await.map_err(|_| Error::channel())
    }

    pub async fn request<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(ResponseSender<R>) -> T,
    {
        let (tx, rx) = response_channel();
        self.send(f(tx)).await?;
        rx.recv().await
    }
}

#[derive(Debug)]
pub struct ResponseSender<T>(oneshot::Sender<T>);
#[derive(Debug)]
pub struct ResponseReceiver<T>(oneshot::Receiver<T>);

pub fn response_channel<T>() -> (ResponseSender<T>, ResponseReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (ResponseSender(tx), ResponseReceiver(rx))
}

impl<T: std::fmt::Debug> ResponseSender<T> {
    pub fn send(self, msg: T) {
        if let Err(err) = self.0.send(msg) {
            warn!("ignoring response channel error: {err:?}")
        }
    }
}

impl<T> ResponseReceiver<T> {
    pub async fn recv(self) -> Result<T> {
        self.0.await.map_err(|_| Error::channel())
    }
}
