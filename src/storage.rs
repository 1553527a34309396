// ===============================
// src/storage.rs
// ===============================
//
// Durable local state: two independent JSON files in the data directory.
// - shopping-cart-storage.json : {"items": [...]}
// - client-auth-storage.json   : {"token": "..."}
//
// Tulis ke temp file unik di direktori yang sama, lalu rename ke target.
// Last write wins; tidak ada versioning antar proses.
//
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::domain::CartLine;

pub const CART_FILE: &str = "shopping-cart-storage.json";
pub const AUTH_FILE: &str = "client-auth-storage.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt state in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistence seam of the cart store.
pub trait CartRepository {
    fn load(&self) -> Result<Vec<CartLine>, StorageError>;
    fn save(&self, lines: &[CartLine]) -> Result<(), StorageError>;
}

/// Persistence seam of the auth session. Only the raw token is kept.
pub trait TokenRepository {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, token: Option<&str>) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CartFile {
    #[serde(default)]
    items: Vec<CartLine>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthFile {
    #[serde(default)]
    token: Option<String>,
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StorageError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&raw).map_err(|source| StorageError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let body = serde_json::to_vec(value)?;
    // Unique temp name per writer; concurrent saves never share a half-written file.
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&body).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileCartRepository {
    path: PathBuf,
}

impl FileCartRepository {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(CART_FILE),
        }
    }
}

impl CartRepository for FileCartRepository {
    fn load(&self) -> Result<Vec<CartLine>, StorageError> {
        read_json::<CartFile>(&self.path).map(|f| f.items)
    }

    fn save(&self, lines: &[CartLine]) -> Result<(), StorageError> {
        write_json(
            &self.path,
            &CartFile {
                items: lines.to_vec(),
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct FileTokenRepository {
    path: PathBuf,
}

impl FileTokenRepository {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(AUTH_FILE),
        }
    }
}

impl TokenRepository for FileTokenRepository {
    fn load(&self) -> Result<Option<String>, StorageError> {
        read_json::<AuthFile>(&self.path).map(|f| f.token)
    }

    fn save(&self, token: Option<&str>) -> Result<(), StorageError> {
        write_json(
            &self.path,
            &AuthFile {
                token: token.map(str::to_string),
            },
        )
    }
}


#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    fn line(variant_id: i64, quantity: u32) -> CartLine {
        CartLine {
            variant_id,
            product_id: 1,
            product_name: "Kit reparación".to_string(),
            variant_size: Some("Cabello seco".to_string()),
            unit_price: 22_500,
            original_unit_price: Some(25_000),
            quantity,
            image_url: "/product.jpeg".to_string(),
            store_id: Some(3),
        }
    }

    #[test]
    fn missing_files_load_as_empty() -> TestResult {
        let dir = tempfile::tempdir()?;
        assert!(FileCartRepository::in_dir(dir.path()).load()?.is_empty());
        assert_eq!(FileTokenRepository::in_dir(dir.path()).load()?, None);
        Ok(())
    }

    #[test]
    fn cart_file_round_trips_lines() -> TestResult {
        let dir = tempfile::tempdir()?;
        let repo = FileCartRepository::in_dir(&dir.path().join("nested"));
        let lines = vec![line(7, 3), line(9, 1)];

        repo.save(&lines)?;

        assert_eq!(repo.load()?, lines);
        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&repo.path)?)?;
        assert_eq!(raw["items"][0]["variantId"], 7);
        Ok(())
    }

    #[test]
    fn token_file_keeps_only_the_token() -> TestResult {
        let dir = tempfile::tempdir()?;
        let repo = FileTokenRepository::in_dir(dir.path());

        repo.save(Some("abc.def.ghi"))?;
        assert_eq!(repo.load()?.as_deref(), Some("abc.def.ghi"));

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(dir.path().join(AUTH_FILE))?)?;
        assert_eq!(raw, serde_json::json!({ "token": "abc.def.ghi" }));

        repo.save(None)?;
        assert_eq!(repo.load()?, None);
        Ok(())
    }

    #[test]
    fn corrupt_cart_file_is_reported() -> TestResult {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(CART_FILE), b"{not json")?;

        let result = FileCartRepository::in_dir(dir.path()).load();

        assert!(
            matches!(result, Err(StorageError::Decode { .. })),
            "expected Decode, got {result:?}"
        );
        Ok(())
    }

    #[test]
    fn concurrent_saves_leave_a_whole_file_and_no_temp_files() -> TestResult {
        let dir = tempfile::tempdir()?;
        let repo = FileCartRepository::in_dir(dir.path());

        std::thread::scope(|scope| {
            for writer in 0..8_u32 {
                let repo = repo.clone();
                scope.spawn(move || {
                    for round in 0..25_u32 {
                        let lines: Vec<CartLine> = (0..=(writer + round) % 6)
                            .map(|i| line(i64::from(i) + 1, writer + 1))
                            .collect();
                        repo.save(&lines).expect("save");
                    }
                });
            }
        });

        let lines = repo.load()?;
        assert!(!lines.is_empty());
        let writer_qty = lines[0].quantity;
        assert!(lines.iter().all(|l| l.quantity == writer_qty));
        let names: Vec<_> = fs::read_dir(dir.path())?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<Result<_, _>>()?;
        assert_eq!(names, vec![std::ffi::OsString::from(CART_FILE)]);
        Ok(())
    }
}
