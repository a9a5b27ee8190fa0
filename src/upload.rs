//! 带密钥校验的 multipart 上传处理器。

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::storage::{Storage, sanitize_file_name};

pub const UPLOAD_SUCCESS: &str = "File uploaded successfully";
const INVALID_UPLOAD_KEY: &str = "Invalid upload key";

/// 上传配置，启动时构建后只读。
pub struct UploadConfig {
    pub upload_key: String,
    pub max_size: u64,
    pub buffer_limit: usize,
}

impl UploadConfig {
    fn authorize(&self, candidate: &str) -> Result<(), ApiError> {
        if candidate == self.upload_key {
            return Ok(());
        }
        warn!("upload rejected: invalid upload key");
        Err(ApiError::Unauthorized(INVALID_UPLOAD_KEY.into()))
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("upload_key", &"<redacted>")
            .field("max_size", &self.max_size)
            .field("buffer_limit", &self.buffer_limit)
            .finish()
    }
}

struct StoredFile {
    path: PathBuf,
    bytes: u64,
}

enum UploadedFile {
    Stored(StoredFile),
    Buffered { file_name: String, data: Vec<u8> },
}

#[derive(Default)]
struct UploadForm {
    authorized: bool,
    upload_path: Option<String>,
    file: Option<UploadedFile>,
}

impl UploadForm {
    /// 密钥通过前的任何解析错误都按未授权处理。
    fn reject(&self, err: MultipartError) -> ApiError {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge(err.body_text());
        }
        if !self.authorized {
            return ApiError::Unauthorized(INVALID_UPLOAD_KEY.into());
        }
        ApiError::BadRequest(err.body_text())
    }
}

/// 接收 multipart 上传：`upload_key`、`upload_path`、`file`。
///
/// 字段按顺序到达时文件直接流式写盘；`file` 先于密钥或路径到达时先缓存
/// 在内存（不超过 `buffer_limit`），待整个表单读完并校验密钥后再写入。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<&'static str, ApiError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(error = %rejection, "upload body is not multipart");
            upload.authorize("")?;
            return Err(ApiError::BadRequest(rejection.body_text()));
        }
    };

    let mut form = UploadForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(form.reject(err)),
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match name.as_str() {
            "upload_key" if !form.authorized => {
                let value = field.text().await.map_err(|err| form.reject(err))?;
                upload.authorize(&value)?;
                form.authorized = true;
            }
            "upload_path" if form.upload_path.is_none() => {
                let value = field.text().await.map_err(|err| form.reject(err))?;
                form.upload_path = Some(value);
            }
            "file" if form.file.is_none() => {
                let Some(file_name) = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                else {
                    continue;
                };
                let uploaded = match (form.authorized, form.upload_path.as_deref()) {
                    (true, Some(upload_path)) => UploadedFile::Stored(
                        store_field(&storage, upload_path, &file_name, field).await?,
                    ),
                    _ => {
                        let data = buffer_field(field, upload.buffer_limit, &form).await?;
                        UploadedFile::Buffered { file_name, data }
                    }
                };
                form.file = Some(uploaded);
            }
            _ => {}
        }
    }

    if !form.authorized {
        upload.authorize("")?;
    }

    let upload_path = form.upload_path.unwrap_or_default();
    let stored = match form.file {
        None => return Err(ApiError::BadRequest("no file field in request".into())),
        Some(UploadedFile::Stored(stored)) => stored,
        Some(UploadedFile::Buffered { file_name, data }) => {
            store_bytes(&storage, &upload_path, &file_name, &data).await?
        }
    };

    info!(
        path = %stored.path.display(),
        bytes = stored.bytes,
        "file uploaded"
    );
    Ok(UPLOAD_SUCCESS)
}

/// 解析目标路径、按需创建目录并创建（或截断）目标文件。
async fn create_destination(
    storage: &Storage,
    upload_path: &str,
    file_name: &str,
) -> Result<(PathBuf, File), ApiError> {
    let file_name = sanitize_file_name(file_name)
        .ok_or_else(|| ApiError::BadRequest("invalid file name".into()))?;
    let dir = storage.resolve_dir_checked(upload_path).await?;
    if fs::metadata(&dir).await.is_err() {
        debug!(dir = %dir.display(), "creating upload directory");
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }

    let target = dir.join(file_name);
    storage.ensure_not_symlink(&target).await?;
    let file = File::create(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((target, file))
}

/// 将 multipart 文件字段流式写入目标文件。
///
/// 写入失败时不回滚，目标文件可能只包含部分内容。
async fn store_field(
    storage: &Storage,
    upload_path: &str,
    file_name: &str,
    mut field: Field<'_>,
) -> Result<StoredFile, ApiError> {
    let (path, mut file) = create_destination(storage, upload_path, file_name).await?;

    let mut bytes: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                warn!(path = %path.display(), bytes, error = %err, "upload stream failed");
                if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    return Err(ApiError::PayloadTooLarge(err.body_text()));
                }
                return Err(ApiError::BadRequest(err.body_text()));
            }
        };
        file.write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        bytes += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(StoredFile { path, bytes })
}

/// 在密钥校验前缓存文件字段，超过上限即拒绝。
async fn buffer_field(
    mut field: Field<'_>,
    limit: usize,
    form: &UploadForm,
) -> Result<Vec<u8>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(|err| form.reject(err))? {
        if data.len() + chunk.len() > limit {
            warn!(limit, "file part sent before upload key exceeds buffer limit");
            return Err(ApiError::PayloadTooLarge(format!(
                "file part exceeds {limit} byte buffer; send upload_key and upload_path before file"
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn store_bytes(
    storage: &Storage,
    upload_path: &str,
    file_name: &str,
    data: &[u8],
) -> Result<StoredFile, ApiError> {
    let (path, mut file) = create_destination(storage, upload_path, file_name).await?;
    file.write_all(data)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    file.flush()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(StoredFile {
        path,
        bytes: data.len() as u64,
    })
}
