use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "hashlinks",
    about = "HashLinks: render composable blocks and verify their integrity",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Render a block and everything it embeds
    Render(RenderArgs),
    /// List the HashLinks embedded in a template
    Scan(ScanArgs),
    /// Hash a file
    Hash(HashArgs),
    /// Build a Merkle tree over files
    Merkle(MerkleArgs),
    /// Create a manifest binding a module to its metadata
    Manifest(ManifestArgs),
    /// Verify a module and its metadata against a manifest
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct RenderArgs {
    pub block_id: String,
    /// Directory holding `blocks/<id>/` and `content/`
    #[arg(long, default_value = ".")]
    pub blocks: PathBuf,
    /// Attribute override as `key=value`; JSON values are parsed
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    pub attributes: Vec<String>,
    /// TOML render configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct ScanArgs {
    pub template: PathBuf,
}

#[derive(Args)]
pub struct HashArgs {
    pub file: PathBuf,
    #[arg(long, default_value = "blake3")]
    pub algorithm: String,
}

#[derive(Args)]
pub struct MerkleArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Print and check the inclusion proof for this leaf
    #[arg(long)]
    pub proof: Option<usize>,
}

#[derive(Args)]
pub struct ManifestArgs {
    pub wasm: PathBuf,
    pub metadata: PathBuf,
    #[arg(long, default_value = "blake3")]
    pub algorithm: String,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub wasm: PathBuf,
    pub metadata: PathBuf,
    pub manifest: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_render() {
        let cli = Cli::try_parse_from([
            "hashlinks", "render", "0.0.123", "--blocks", "site", "--attr", "count=3", "--attr",
            "label=Clicks",
        ])
        .unwrap();
        if let Command::Render(args) = cli.command {
            assert_eq!(args.block_id, "0.0.123");
            assert_eq!(args.blocks, PathBuf::from("site"));
            assert_eq!(args.attributes, vec!["count=3", "label=Clicks"]);
            assert!(args.config.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_render_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["hashlinks", "render", "root"]).unwrap();
        if let Command::Render(args) = cli.command {
            assert_eq!(args.blocks, PathBuf::from("."));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_hash_algorithm() {
        let cli =
            Cli::try_parse_from(["hashlinks", "hash", "a.bin", "--algorithm", "blake3-512"]).unwrap();
        if let Command::Hash(args) = cli.command {
            assert_eq!(args.algorithm, "blake3-512");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_merkle_proof() {
        let cli =
            Cli::try_parse_from(["hashlinks", "merkle", "a", "b", "c", "--proof", "1"]).unwrap();
        if let Command::Merkle(args) = cli.command {
            assert_eq!(args.files.len(), 3);
            assert_eq!(args.proof, Some(1));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn merkle_needs_files() {
        assert!(Cli::try_parse_from(["hashlinks", "merkle"]).is_err());
    }

    #[test]
    fn parse_verify() {
        let cli = Cli::try_parse_from(["hashlinks", "verify", "m.wasm", "meta.json", "manifest.json"])
            .unwrap();
        assert!(matches!(cli.command, Command::Verify(_)));
    }

    #[test]
    fn parse_global_flags() {
        let cli =
            Cli::try_parse_from(["hashlinks", "--verbose", "--format", "json", "scan", "t.html"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
