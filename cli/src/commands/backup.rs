use anyhow::{Result, bail};
use std::path::PathBuf;
use std::process;

use mealprep_core::MealPlanService;

pub(crate) fn cmd_backup_list(svc: &MealPlanService, json: bool) -> Result<()> {
    let backups = svc.list_backups()?;
    if backups.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No backups yet");
        }
        process::exit(2);
    }

    if json {
        let entries: Vec<_> = backups
            .iter()
            .map(|b| serde_json::json!({ "path": b.path, "taken_at": b.taken_at }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (i, b) in backups.iter().enumerate().rev() {
        let stamp = b.taken_at.format("%Y-%m-%d %H:%M:%S");
        println!("{:>3}  {stamp}  {}", i + 1, b.path.display());
    }
    Ok(())
}

/// Restore from a backup path, or from a 1-based index into `backup list`.
pub(crate) fn cmd_backup_restore(svc: &MealPlanService, which: &str, json: bool) -> Result<()> {
    let path = if let Ok(index) = which.parse::<usize>() {
        let backups = svc.list_backups()?;
        match index.checked_sub(1).and_then(|i| backups.get(i)) {
            Some(b) => b.path.clone(),
            None => bail!("No backup #{index}; there are {}", backups.len()),
        }
    } else {
        PathBuf::from(which)
    };

    let restored = svc.restore_backup(&path)?;
    if json {
        println!("{}", serde_json::json!({ "restored": restored }));
    } else {
        println!("Restored {}", restored.display());
    }
    Ok(())
}
