//! Index statistics overview.
//!
//! Used by `nexusync stats` (and after `build`) to show what is indexed
//! and where it lives on disk.

use crate::index_store::IndexStats;
use crate::registry::Registry;

/// Print a human-readable summary of `stats`.
pub fn print_stats(stats: &IndexStats) {
    let registry_size = file_size(&Registry::path_in(&stats.persist_location));
    let vector_size = file_size(&stats.vector_store_location);

    println!("NexuSync Index Stats");
    println!("====================");
    println!();
    println!(
        "  Registry:      {} ({})",
        stats.persist_location.display(),
        format_bytes(registry_size)
    );
    println!(
        "  Vector store:  {} ({})",
        stats.vector_store_location.display(),
        format_bytes(vector_size)
    );
    println!(
        "  Embeddings:    {} ({} dims)",
        stats.embedding_model, stats.embedding_dims
    );
    println!();
    println!("  Documents:     {}", stats.document_count);
    println!("  Nodes:         {}", stats.node_count);
    if stats.vector_node_count != stats.node_count as u64 {
        println!(
            "  Warning:       vector store holds {} nodes; run `nexusync refresh` to repair",
            stats.vector_node_count
        );
    }
    println!();
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
