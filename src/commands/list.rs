use super::Context;
use crate::error::Result;
use crate::output::heading;

/// Print the name of every known formula.
pub fn list(ctx: &Context) -> Result<()> {
    let names = ctx.factory.reader().available();

    // Bare names when piped
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    if is_tty {
        println!("{}", heading("Formulae"));
    }

    for name in names {
        println!("{}", name);
    }

    Ok(())
}
