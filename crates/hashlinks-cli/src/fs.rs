//! Directory-backed collaborators.
//!
//! ```text
//! <dir>/blocks/<id>/definition.json
//! <dir>/blocks/<id>/template.html
//! <dir>/content/<id>.<ext>
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use hashlinks_types::{
    BlockDefinition, BlockLoader, CollaboratorError, ContentResolver, HashLinkUri, LoadedBlock,
    ResolveOptions, ResolvedContent, HASHLINK_SCHEME,
};

/// Ids become path components, so anything that could escape the
/// directory is refused.
fn checked_id(id: &str) -> Result<&str, CollaboratorError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(CollaboratorError::Other(format!("invalid id: {id:?}")));
    }
    Ok(id)
}

fn io_error(path: &Path, e: io::Error) -> CollaboratorError {
    match e.kind() {
        io::ErrorKind::NotFound => CollaboratorError::NotFound(path.display().to_string()),
        _ => CollaboratorError::Other(format!("{}: {e}", path.display())),
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

pub struct FsBlockLoader {
    root: PathBuf,
}

impl FsBlockLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            root: dir.as_ref().join("blocks"),
        }
    }
}

#[async_trait]
impl BlockLoader for FsBlockLoader {
    async fn load_block(&self, id: &str) -> Result<Option<LoadedBlock>, CollaboratorError> {
        let dir = self.root.join(checked_id(id)?);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(None);
        }

        let definition_path = dir.join("definition.json");
        let raw = tokio::fs::read_to_string(&definition_path)
            .await
            .map_err(|e| io_error(&definition_path, e))?;
        let definition: BlockDefinition = serde_json::from_str(&raw).map_err(|e| {
            CollaboratorError::Other(format!("{}: {e}", definition_path.display()))
        })?;

        let template_path = dir.join("template.html");
        let template = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|e| io_error(&template_path, e))?;
        Ok(Some(LoadedBlock {
            definition,
            template,
        }))
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

pub struct FsContentResolver {
    root: PathBuf,
}

impl FsContentResolver {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            root: dir.as_ref().join("content"),
        }
    }
}

/// First file in `root` named `id` exactly or `id.<ext>`.
fn find_content(root: &Path, id: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name().is_some_and(|name| name == id)
                || path.file_stem().is_some_and(|stem| stem == id)
        })
        .collect();
    candidates.sort();
    candidates
        .iter()
        .find(|path| path.file_name().is_some_and(|name| name == id))
        .or_else(|| candidates.first())
        .cloned()
}

/// Content type and whether it is binary, by extension.
pub fn content_type_for(path: &Path) -> (&'static str, bool) {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "css" => ("text/css", false),
        "js" | "mjs" => ("application/javascript", false),
        "html" | "htm" | "hbs" => ("text/html", false),
        "json" => ("application/json", false),
        "svg" => ("image/svg+xml", false),
        "txt" | "md" => ("text/plain", false),
        "png" => ("image/png", true),
        "jpg" | "jpeg" => ("image/jpeg", true),
        "gif" => ("image/gif", true),
        "webp" => ("image/webp", true),
        "wasm" => ("application/wasm", true),
        _ => ("application/octet-stream", true),
    }
}

#[async_trait]
impl ContentResolver for FsContentResolver {
    async fn resolve(
        &self,
        reference: &str,
        _options: &ResolveOptions,
    ) -> Result<ResolvedContent, CollaboratorError> {
        let id = if reference.starts_with(HASHLINK_SCHEME) {
            HashLinkUri::parse(reference)
                .map_err(|e| CollaboratorError::Other(e.to_string()))?
                .reference
        } else {
            reference.to_string()
        };
        checked_id(&id)?;

        let root = self.root.clone();
        let lookup_id = id.clone();
        let path = tokio::task::spawn_blocking(move || find_content(&root, &lookup_id))
            .await
            .map_err(|e| CollaboratorError::Other(e.to_string()))?
            .ok_or_else(|| CollaboratorError::NotFound(id.clone()))?;

        let data = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        let (content_type, binary) = content_type_for(&path);
        Ok(if binary {
            ResolvedContent::binary(id, content_type, data)
        } else {
            ResolvedContent::text(id, content_type, String::from_utf8_lossy(&data).into_owned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashlinks_types::Network;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn loads_block_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "blocks/0.0.1/definition.json", r#"{"name":"hello"}"#);
        write(dir.path(), "blocks/0.0.1/template.html", "<p>hi</p>");

        let loader = FsBlockLoader::new(dir.path());
        let block = loader.load_block("0.0.1").await.unwrap().unwrap();
        assert_eq!(block.definition.name, "hello");
        assert_eq!(block.template, "<p>hi</p>");
        assert!(loader.load_block("0.0.2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broken_block_is_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "blocks/bad/definition.json", "{not json");
        write(dir.path(), "blocks/bad/template.html", "");
        write(dir.path(), "blocks/half/definition.json", r#"{"name":"half"}"#);

        let loader = FsBlockLoader::new(dir.path());
        assert!(matches!(
            loader.load_block("bad").await,
            Err(CollaboratorError::Other(_))
        ));
        assert!(matches!(
            loader.load_block("half").await,
            Err(CollaboratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ids_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsBlockLoader::new(dir.path());
        assert!(loader.load_block("../etc").await.is_err());
        assert!(loader.load_block("..").await.is_err());

        let content = FsContentResolver::new(dir.path());
        let options = ResolveOptions::new(Network::Testnet);
        assert!(content.resolve("a/b", &options).await.is_err());
    }

    #[tokio::test]
    async fn resolves_content_by_stem_or_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "content/0.0.9.css", "p { color: red; }");
        write(dir.path(), "content/base.css", "body {}");
        std::fs::write(dir.path().join("content/0.0.10.wasm"), b"\0asm").unwrap();

        let content = FsContentResolver::new(dir.path());
        let options = ResolveOptions::new(Network::Testnet);

        let style = content.resolve("0.0.9", &options).await.unwrap();
        assert_eq!(style.content_type, "text/css");
        assert!(!style.is_binary);

        let by_name = content.resolve("base.css", &options).await.unwrap();
        assert_eq!(by_name.as_text(), "body {}");

        let module = content.resolve("hcs://1/0.0.10", &options).await.unwrap();
        assert!(module.is_binary);
        assert_eq!(module.source_id, "0.0.10");

        assert!(matches!(
            content.resolve("0.0.404", &options).await,
            Err(CollaboratorError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_extensions_are_binary() {
        assert_eq!(content_type_for(Path::new("x.bin")), ("application/octet-stream", true));
        assert_eq!(content_type_for(Path::new("x.JS")), ("application/javascript", false));
    }
}
