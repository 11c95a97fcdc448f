//! Version command - show version information

use anyhow::Result;

/// Execute the version command
pub async fn execute(verbose: bool) -> Result<()> {
    print_version(verbose);
    Ok(())
}

/// Print version information
///
/// If verbose is false, prints a single line with name and version.
/// If verbose is true, prints build details and the supported algorithms.
pub fn print_version(verbose: bool) {
    println!("{} {}", crate::NAME, crate::VERSION);

    if verbose {
        println!();
        println!("Features:");
        println!("  - SSH-2 echo sessions over russh");
        println!("  - Auth policies: publickey, insecure-open, deny");
        println!("  - Host keys: ed25519 (generated), any OpenSSH/PKCS#8 key (loaded)");
        println!("  - Client keys: ed25519, ecdsa-p256, ecdsa-p384, ecdsa-p521");
        println!("  - JSONL audit logging");
        println!();
        println!("Build info:");
        println!("  Target:    {}", env!("ECHO_SSHD_BUILD_TARGET"));
        println!("  Profile:   {}", env!("ECHO_SSHD_BUILD_PROFILE"));
        println!("  Rust:      {}", env!("ECHO_SSHD_RUSTC_VERSION"));
        if let Ok(exe) = std::env::current_exe() {
            println!("  Executable: {}", exe.display());
        }
        println!();
        println!("License:    MIT");
    }
}
