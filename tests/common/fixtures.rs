//! Test fixtures - sample recipes.

#![allow(dead_code)]

/// Installs an executable `hello` that prints "hi", verified by running it.
pub const HELLO_RECIPE: &str = r#"
let description = "Prints a greeting";
let homepage = "https://example.com/hello";
let repos = #{ stable: #{ dummy: true } };

fn build() {
    run("mkdir -p $PREFIX/bin");
    run("printf '#!/bin/sh\\necho hi\\n' > $PREFIX/bin/hello");
    run("chmod +x $PREFIX/bin/hello");
}

fn verify() {
    let out = run_output("hello");
    check(out == "hi", "unexpected output: " + out);
}
"#;

/// Builds fine but fails verification.
pub const BAD_VERIFY_RECIPE: &str = r#"
let description = "Fails verification";

fn build() {
    run("mkdir -p $PREFIX/bin $PREFIX/share/doc");
    run("touch $PREFIX/bin/broken $PREFIX/share/doc/README");
}

fn verify() {
    run("test -x broken-does-not-exist");
}
"#;

/// Installs two executables, `bin/aaa` and `bin/zzz`, linked in that order.
pub const TWO_BIN_RECIPE: &str = r#"
let description = "Two programs";

fn build() {
    run("mkdir -p $PREFIX/bin");
    run("touch $PREFIX/bin/aaa $PREFIX/bin/zzz");
}

fn verify() {}
"#;

/// Fails while building.
pub const BAD_BUILD_RECIPE: &str = r#"
let description = "Fails to build";

fn build() {
    run("mkdir -p $PREFIX/bin");
    run("exit 3");
}

fn verify() {}
"#;

/// Recipe whose build appends one line to `counter` on every run.
pub fn counting_recipe(counter: &std::path::Path) -> String {
    format!(
        r#"
fn build() {{
    run("echo built >> {counter}");
    run("mkdir -p $PREFIX/bin && touch $PREFIX/bin/counted");
}}

fn verify() {{
    check(exists(env("PREFIX") + "/bin/counted"), "nothing installed");
}}
"#,
        counter = counter.display()
    )
}

/// Recipe requiring `requires` that leaves `marker` behind when built.
pub fn marking_recipe(requires: &[&str], marker: &std::path::Path) -> String {
    let requires: Vec<String> = requires.iter().map(|r| format!("\"{}\"", r)).collect();
    format!(
        r#"
let requires = [{requires}];

fn build() {{
    run("touch {marker}");
    run("mkdir -p $PREFIX/share && touch $PREFIX/share/$NAME");
}}

fn verify() {{}}
"#,
        requires = requires.join(", "),
        marker = marker.display()
    )
}

/// Recipe that installs `bin/hello` out of the fetched source tree.
pub fn source_recipe(repo: &str) -> String {
    format!(
        r#"
let description = "Built from fetched source";
let repos = #{{ stable: {repo} }};

fn build() {{
    check(exists("hello"), "source not fetched");
    run("mkdir -p $PREFIX/bin && cp hello $PREFIX/bin/hello && chmod +x $PREFIX/bin/hello");
}}

fn verify() {{
    run("hello");
}}
"#,
        repo = repo
    )
}

/// Rhai map for an archive source
pub fn archive_source(path: &std::path::Path, hash: &str) -> String {
    format!(r#"#{{ archive: "{}", hash: "{}" }}"#, path.display(), hash)
}

/// Rhai map for a git source on a branch
pub fn git_source(path: &std::path::Path, branch: &str) -> String {
    format!(r#"#{{ git: "{}", branch: "{}" }}"#, path.display(), branch)
}

/// Shell script printing `message`
pub fn script(message: &str) -> String {
    format!("#!/bin/sh\necho {}\n", message)
}
