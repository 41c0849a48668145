use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use extrato::{
    detect_source, write_consolidated_csv, write_diagnostics_json, BatchConverter, ConvertError,
    FileStatus,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("."));

    println!(
        "📂 Extrato v{} - consolidando {}",
        extrato::VERSION,
        dir.display()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Collect supported files
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && detect_source(path).is_some())
        .collect();
    files.sort();

    if files.is_empty() {
        eprintln!("❌ Nenhum arquivo de extrato encontrado em {}", dir.display());
        std::process::exit(1);
    }
    println!("✓ {} arquivos encontrados", files.len());

    // 2. Run the batch
    let report = match BatchConverter::new().run(&files) {
        Ok(report) => report,
        Err(ConvertError::TotalFailure) => {
            eprintln!("❌ Nenhuma transação aproveitável em nenhum arquivo.");
            eprintln!("   Nenhuma saída foi gerada.");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    // 3. Per-file results
    for file in &report.files {
        match file.status {
            FileStatus::Converted => {
                let strategy = file
                    .strategy
                    .map(|s| format!(" [{}]", s.name()))
                    .unwrap_or_default();
                println!(
                    "✓ {}: {} transações, {} linhas ignoradas{}",
                    file.file,
                    file.transactions,
                    file.skipped.len(),
                    strategy
                );
            }
            FileStatus::Failed => {
                println!(
                    "✗ {}: {}",
                    file.file,
                    file.error.as_deref().unwrap_or("falha desconhecida")
                );
            }
        }
    }

    // 4. Write outputs
    let csv_path = dir.join("extrato_consolidado.csv");
    let diag_path = dir.join("extrato_diagnostico.json");
    write_consolidated_csv(&csv_path, &report.transactions)?;
    write_diagnostics_json(&diag_path, &report)?;

    // 5. Summary
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Arquivos convertidos: {}", report.converted_files());
    if report.failed_files() > 0 {
        println!("✗ Arquivos com falha: {}", report.failed_files());
    }
    println!("✓ Transações consolidadas: {}", report.transactions.len());
    println!("✓ Duplicadas removidas: {}", report.dedup.removed);

    let mismatched: usize = report
        .reconciliation
        .iter()
        .map(|r| r.mismatches(0.005).len())
        .sum();
    if mismatched > 0 {
        println!(
            "⚠ Diferenças de saldo: {} (ver {})",
            mismatched,
            diag_path.display()
        );
    }
    println!("✓ Saída gerada: {}", csv_path.display());

    Ok(())
}
