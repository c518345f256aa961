use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use serde_json::{json, Value};

use hashlinks_crypto::{
    create_wasm_manifest, hash, verify_wasm_module, HashAlgorithm, MerkleTree, Side, WasmManifest,
};
use hashlinks_render::{BlockRenderer, Collaborators, RenderConfig, RenderOptions, RenderOutput};
use hashlinks_template::scan;

use crate::cli::*;
use crate::fs::{FsBlockLoader, FsContentResolver};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Render(args) => cmd_render(args, format),
        Command::Scan(args) => cmd_scan(args, format),
        Command::Hash(args) => cmd_hash(args, format),
        Command::Merkle(args) => cmd_merkle(args, format),
        Command::Manifest(args) => cmd_manifest(args),
        Command::Verify(args) => cmd_verify(args),
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    serde_json::from_slice(&read(path)?)
        .with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `key=value`, where a value that parses as JSON is taken as JSON.
fn parse_attribute(raw: &str) -> anyhow::Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("attribute {raw:?} is not key=value"))?;
    if key.is_empty() {
        bail!("attribute {raw:?} has an empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

async fn render_block(args: &RenderArgs) -> anyhow::Result<RenderOutput> {
    let config = match &args.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    let mut options = RenderOptions::new();
    for raw in &args.attributes {
        let (key, value) = parse_attribute(raw)?;
        options = options.attribute(key, value);
    }

    let collaborators = Collaborators::new(
        Arc::new(FsBlockLoader::new(&args.blocks)),
        Arc::new(FsContentResolver::new(&args.blocks)),
    );
    let renderer = BlockRenderer::new(collaborators, config)?;
    Ok(renderer.render(&args.block_id, options).await?)
}

fn cmd_render(args: RenderArgs, format: OutputFormat) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(render_block(&args))?;

    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => {
            for style in &output.styles {
                println!("<style data-resource=\"{}\">\n{}\n</style>", style.id, style.content);
            }
            println!("{}", output.html);
            for script in &output.scripts {
                println!("<script data-resource=\"{}\">\n{}\n</script>", script.id, script.content);
            }
            for error in &output.errors {
                eprintln!("{} {}", "warning:".yellow().bold(), error);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn cmd_scan(args: ScanArgs, format: OutputFormat) -> anyhow::Result<()> {
    let body = String::from_utf8(read(&args.template)?)
        .with_context(|| format!("{} is not UTF-8", args.template.display()))?;
    let report = scan(&body);

    match format {
        OutputFormat::Json => print_json(&json!({
            "references": report.references,
            "errors": report
                .errors
                .iter()
                .map(|e| json!({
                    "uri": e.uri,
                    "start": e.span.start,
                    "end": e.span.end,
                    "error": e.error.to_string(),
                }))
                .collect::<Vec<_>>(),
        }))?,
        OutputFormat::Text => {
            if report.is_empty() {
                println!("No HashLinks found.");
            }
            for reference in &report.references {
                println!(
                    "{} <{}> {}..{} {}",
                    reference.uri().cyan(),
                    reference.tag_name,
                    reference.span.start,
                    reference.span.end,
                    format!("{:?}", reference.loading).to_lowercase().dimmed()
                );
                if let Some(attributes) = &reference.inline_attributes {
                    println!("  attributes: {}", Value::Object(attributes.clone()));
                }
                if let Some(actions) = &reference.inline_actions {
                    for (name, action) in actions {
                        println!("  action: {} → {}", name.bold(), action.yellow());
                    }
                }
            }
            for error in &report.errors {
                println!("{} {} {}", "✗".red().bold(), error.uri.red(), error.error);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// hash / merkle
// ---------------------------------------------------------------------------

fn cmd_hash(args: HashArgs, format: OutputFormat) -> anyhow::Result<()> {
    let algorithm: HashAlgorithm = args.algorithm.parse()?;
    let digest = hash(&read(&args.file)?, algorithm);
    match format {
        OutputFormat::Json => print_json(&json!({
            "file": args.file.display().to_string(),
            "algorithm": algorithm,
            "digest": digest.to_hex(),
        })),
        OutputFormat::Text => {
            println!("{}  {}", digest.to_hex(), args.file.display());
            Ok(())
        }
    }
}

fn merkle_report(files: &[PathBuf], proof: Option<usize>) -> anyhow::Result<Value> {
    let leaves = files
        .iter()
        .map(|path| read(path.as_path()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let tree = MerkleTree::from_data(&leaves);

    let mut report = json!({
        "root": tree.root().to_hex(),
        "leaves": tree.leaf_hashes().iter().map(|h| h.to_hex()).collect::<Vec<_>>(),
    });
    if let Some(index) = proof {
        let proof = tree
            .proof(index)
            .ok_or_else(|| anyhow!("no leaf {index}; the tree has {}", tree.leaf_count()))?;
        report["proof"] = json!({
            "index": index,
            "path": proof
                .path
                .iter()
                .map(|step| json!({
                    "side": match step.side {
                        Side::Left => "left",
                        Side::Right => "right",
                    },
                    "sibling": step.sibling.to_hex(),
                }))
                .collect::<Vec<_>>(),
            "valid": proof.verify_against(&tree.root()),
        });
    }
    Ok(report)
}

fn cmd_merkle(args: MerkleArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = merkle_report(&args.files, args.proof)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!("Root: {}", report["root"].as_str().unwrap_or_default().yellow().bold());
    for (path, leaf) in args.files.iter().zip(report["leaves"].as_array().into_iter().flatten()) {
        println!("  {}  {}", leaf.as_str().unwrap_or_default().dimmed(), path.display());
    }
    if let Some(proof) = report.get("proof") {
        println!("Proof for leaf {}:", proof["index"]);
        for step in proof["path"].as_array().into_iter().flatten() {
            println!(
                "  {:<5} {}",
                step["side"].as_str().unwrap_or_default(),
                step["sibling"].as_str().unwrap_or_default()
            );
        }
        if proof["valid"] == json!(true) {
            println!("{} Proof verifies against root", "✓".green().bold());
        } else {
            println!("{} Proof does not verify", "✗".red().bold());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// manifest / verify
// ---------------------------------------------------------------------------

fn cmd_manifest(args: ManifestArgs) -> anyhow::Result<()> {
    let algorithm: HashAlgorithm = args.algorithm.parse()?;
    let manifest = create_wasm_manifest(&read(&args.wasm)?, &read_json(&args.metadata)?, algorithm)?;
    print_json(&manifest)
}

fn verify_files(args: &VerifyArgs) -> anyhow::Result<()> {
    let manifest: WasmManifest = serde_json::from_value(read_json(&args.manifest)?)
        .with_context(|| format!("{} is not a module manifest", args.manifest.display()))?;
    verify_wasm_module(&read(&args.wasm)?, &read_json(&args.metadata)?, &manifest)?;
    Ok(())
}

fn cmd_verify(args: VerifyArgs) -> anyhow::Result<()> {
    match verify_files(&args) {
        Ok(()) => {
            println!("{} Module verified", "✓".green().bold());
            println!("  Code: {}", args.wasm.display());
            println!("  Metadata: {}", args.metadata.display());
            Ok(())
        }
        Err(e) => {
            println!("{} Verification failed", "✗".red().bold());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, relative: &str, contents: &str) -> PathBuf {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn attributes_parse_json_or_fall_back_to_text() {
        assert_eq!(parse_attribute("count=3").unwrap(), ("count".into(), json!(3)));
        assert_eq!(
            parse_attribute("label=Clicks so far").unwrap(),
            ("label".into(), json!("Clicks so far"))
        );
        assert_eq!(parse_attribute("on=true").unwrap().1, json!(true));
        assert_eq!(parse_attribute("eq==").unwrap().1, json!("="));
        assert!(parse_attribute("novalue").is_err());
        assert!(parse_attribute("=x").is_err());
    }

    #[tokio::test]
    async fn renders_a_directory_site() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "blocks/page/definition.json",
            r#"{"name":"page","resources":[{"id":"site.css","kind":"style"}]}"#,
        );
        write(
            dir.path(),
            "blocks/page/template.html",
            r#"<h1>{{title}}</h1><div data-hashlink="hcs://12/counter" data-attributes='{"count":7}'></div>"#,
        );
        write(
            dir.path(),
            "blocks/counter/definition.json",
            r#"{"name":"counter","attributes":{"count":{"type":"number","default":0}}}"#,
        );
        write(dir.path(), "blocks/counter/template.html", "<span>{{count}}</span>");
        write(dir.path(), "content/site.css", "h1 { margin: 0; }");

        let args = RenderArgs {
            block_id: "page".into(),
            blocks: dir.path().to_path_buf(),
            attributes: vec!["title=Welcome".into()],
            config: None,
        };
        let output = render_block(&args).await.unwrap();
        assert_eq!(output.html, "<h1>Welcome</h1><span>7</span>");
        assert_eq!(output.styles[0].id, "site.css");
        assert!(output.errors.is_empty());
    }

    #[tokio::test]
    async fn render_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "blocks/a/definition.json", r#"{"name":"a"}"#);
        write(dir.path(), "blocks/a/template.html", r#"A<i data-hashlink="hcs://12/b"></i>"#);
        write(dir.path(), "blocks/b/definition.json", r#"{"name":"b"}"#);
        write(dir.path(), "blocks/b/template.html", "B");
        let config = write(dir.path(), "render.toml", "max_depth = 1\n");

        let args = RenderArgs {
            block_id: "a".into(),
            blocks: dir.path().to_path_buf(),
            attributes: Vec::new(),
            config: Some(config),
        };
        let output = render_block(&args).await.unwrap();
        assert_eq!(output.html, r#"A<i data-hashlink="hcs://12/b"></i>"#);
    }

    #[tokio::test]
    async fn missing_root_block_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = RenderArgs {
            block_id: "nothing".into(),
            blocks: dir.path().to_path_buf(),
            attributes: Vec::new(),
            config: None,
        };
        assert!(render_block(&args).await.is_err());
    }

    #[test]
    fn merkle_report_includes_verified_proof() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write(dir.path(), "a", "alpha"),
            write(dir.path(), "b", "beta"),
            write(dir.path(), "c", "gamma"),
        ];
        let report = merkle_report(&files, Some(1)).unwrap();
        assert_eq!(report["leaves"].as_array().unwrap().len(), 3);
        assert_eq!(report["proof"]["valid"], json!(true));
        assert!(merkle_report(&files, Some(3)).is_err());
    }

    #[test]
    fn manifest_round_trip_and_tamper_detection() {
        let dir = tempfile::tempdir().unwrap();
        let wasm = write(dir.path(), "m.wasm", "\0asm module bytes");
        let metadata = write(dir.path(), "meta.json", r#"{"name":"counter","version":"1.0.0"}"#);
        let manifest = create_wasm_manifest(
            &read(&wasm).unwrap(),
            &read_json(&metadata).unwrap(),
            HashAlgorithm::Blake3,
        )
        .unwrap();
        let manifest_path = write(
            dir.path(),
            "manifest.json",
            &serde_json::to_string(&manifest).unwrap(),
        );

        let args = VerifyArgs {
            wasm: wasm.clone(),
            metadata: metadata.clone(),
            manifest: manifest_path,
        };
        verify_files(&args).unwrap();

        std::fs::write(&wasm, "\0asm tampered").unwrap();
        let err = verify_files(&args).unwrap_err();
        assert!(err.to_string().contains("code hash mismatch"));
    }
}
