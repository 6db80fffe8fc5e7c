//! Test doubles for the ports.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{
    ArtifactStore, Delivery, DispatchQueue, FileUpload, InferenceError, InferenceGateway,
    NotificationChannel, NotifyError, QueueCounts, QueueError, ReceiptHandle, StoreError,
};

/// Queue that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingQueue {
    pub sent: Mutex<Vec<String>>,
    pub finalized: Mutex<Vec<ReceiptHandle>>,
    pub fail_send: bool,
    pub fail_finalize: bool,
}

impl RecordingQueue {
    pub fn failing_send() -> Self {
        Self {
            fail_send: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> Vec<ReceiptHandle> {
        self.finalized.lock().unwrap().clone()
    }
}

#[async_trait]
impl DispatchQueue for RecordingQueue {
    async fn send(&self, body: String) -> Result<String, QueueError> {
        if self.fail_send {
            return Err(QueueError::Unavailable("connection refused".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(body);
        Ok(format!("m-{}", sent.len()))
    }

    async fn receive(&self, _max: usize, _wait: Duration) -> Result<Vec<Delivery>, QueueError> {
        Ok(Vec::new())
    }

    async fn finalize(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.finalized.lock().unwrap().push(receipt.clone());
        if self.fail_finalize {
            return Err(QueueError::OperationFailed("delete failed".into()));
        }
        Ok(())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(QueueCounts::default())
    }
}

pub enum StubBehavior {
    Image(Vec<u8>),
    Fail(InferenceError),
    Delay(Duration, Vec<u8>),
}

pub struct StubInference {
    behavior: StubBehavior,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl StubInference {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self::new(StubBehavior::Image(bytes))
    }

    pub fn failing(err: InferenceError) -> Self {
        Self::new(StubBehavior::Fail(err))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceGateway for StubInference {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.behavior {
            StubBehavior::Image(bytes) => Ok(bytes.clone()),
            StubBehavior::Fail(err) => Err(err.clone()),
            StubBehavior::Delay(d, bytes) => {
                tokio::time::sleep(*d).await;
                Ok(bytes.clone())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct RecordingStore {
    pub objects: Mutex<Vec<StoredObject>>,
    pub fail: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Io("access denied".into()));
        }
        self.objects.lock().unwrap().push(StoredObject {
            bucket: bucket.into(),
            key: key.into(),
            bytes: bytes.to_vec(),
            content_type: content_type.into(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub conversation_id: String,
    pub bytes: Vec<u8>,
    pub filename: String,
    pub title: String,
    pub caption: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub uploads: Mutex<Vec<UploadedFile>>,
    pub messages: Mutex<Vec<(String, String)>>,
    pub fail_upload: bool,
    pub fail_post: bool,
}

impl RecordingNotifier {
    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn upload_file(&self, upload: FileUpload<'_>) -> Result<(), NotifyError> {
        if self.fail_upload {
            return Err(NotifyError::Api("files.completeUploadExternal: not_in_channel".into()));
        }
        self.uploads.lock().unwrap().push(UploadedFile {
            conversation_id: upload.conversation_id.into(),
            bytes: upload.bytes.to_vec(),
            filename: upload.filename.into(),
            title: upload.title.into(),
            caption: upload.caption.into(),
        });
        Ok(())
    }

    async fn post_message(&self, conversation_id: &str, text: &str) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .unwrap()
            .push((conversation_id.into(), text.into()));
        if self.fail_post {
            return Err(NotifyError::Transport("chat.postMessage: timed out".into()));
        }
        Ok(())
    }
}
