use std::io::{self, Write};

use super::{store, EXIT_OK};

pub fn run(force: bool) -> anyhow::Result<i32> {
    let store = store()?;
    if !store.exists() {
        println!("Nothing to clean.");
        return Ok(EXIT_OK);
    }

    if !force {
        print!("Delete all state under {}? [y/N] ", store.state_dir().display());
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(EXIT_OK);
        }
    }

    store.clean()?;
    println!("State removed.");
    Ok(EXIT_OK)
}
