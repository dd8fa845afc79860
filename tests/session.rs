use modsh::{Interpreter, MemWriter, ModuleRegistry, ModuleResolver};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

fn write_module(root: &Path, name: &str, script: &str, yaml: Option<&str>) {
    let dir = root.join(name);
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("main.sh"), script).unwrap();
    if let Some(yaml) = yaml {
        fs::write(dir.join("module.yaml"), yaml).unwrap();
    }
}

fn module_root() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "shout",
        "printf '%s\\n' \"$ARG_INPUT\" | tr a-z A-Z\n",
        Some(
            "description: upper-case the input\n\
             tags: [text]\n\
             options:\n  \
               input:\n    \
                 type: string\n    \
                 description: text to shout\n    \
                 required: true\n",
        ),
    );
    write_module(
        root.path(),
        "greet",
        "echo \"hello $ARG_NAME\"\n",
        Some(
            "description: say hello\n\
             options:\n  \
               name:\n    \
                 type: string\n    \
                 description: who to greet\n    \
                 default: world\n",
        ),
    );
    write_module(root.path(), "fail", "echo partial\nexit 3\n", None);
    fs::create_dir(root.path().join("not-a-module")).unwrap();
    root
}

fn session(root: &Path) -> (Interpreter, Rc<RefCell<Vec<u8>>>) {
    let mut registry = ModuleRegistry::new(root);
    assert_eq!(registry.discover().unwrap(), 3);
    let (out, buf) = MemWriter::with_handle();
    let sh = Interpreter::new(Box::new(registry))
        .with_output(Box::new(out))
        .with_shell("sh")
        .with_confirm(|_| false);
    (sh, buf)
}

fn text(buf: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buf.borrow()).into_owned()
}

#[test]
fn discovery_skips_directories_without_entry_script() {
    let root = module_root();
    let (sh, _) = session(root.path());
    let names: Vec<&str> = sh
        .modules()
        .list()
        .into_iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(names, ["fail", "greet", "shout"]);
}

#[test]
fn module_output_feeds_the_next_stage() {
    let root = module_root();
    let (mut sh, buf) = session(root.path());
    let value = sh.evaluate_chain("\"quiet\" |> shout |> strlen()").unwrap();
    assert_eq!(value, "5");
    // captured output stays off the console
    assert!(!text(&buf).contains("QUIET"));
}

#[test]
fn builtin_result_becomes_module_input() {
    let root = module_root();
    let (mut sh, _) = session(root.path());
    let value = sh.evaluate_chain("echo(abc) |> shout").unwrap();
    assert_eq!(value, "ABC");
}

#[test]
fn environment_store_fills_module_arguments() {
    let root = module_root();
    let (mut sh, _) = session(root.path());
    assert_eq!(sh.evaluate_chain("greet").unwrap(), "hello world");
    sh.execute("name=modsh");
    assert_eq!(sh.evaluate_chain("greet").unwrap(), "hello modsh");
    assert_eq!(sh.evaluate_chain("greet name=you").unwrap(), "hello you");
}

#[test]
fn top_level_module_streams_to_console() {
    let root = module_root();
    let (mut sh, buf) = session(root.path());
    sh.execute("shout input=loud");
    let out = text(&buf);
    assert!(out.contains("Running module shout"));
    assert!(out.contains("LOUD"));
    assert!(out.contains("Module shout completed in"));
}

#[test]
fn missing_required_option_is_reported() {
    let root = module_root();
    let (mut sh, buf) = session(root.path());
    sh.execute("shout");
    assert!(text(&buf).contains("input"));
    assert!(!sh.execution_state().is_running());
}

#[test]
fn failing_module_aborts_the_chain() {
    let root = module_root();
    let (mut sh, _) = session(root.path());
    let err = sh.evaluate_chain("\"x\" |> fail |> shout").unwrap_err();
    assert_eq!(err.stage_index(), Some(2));
    assert!(!sh.execution_state().is_running());
}

#[test]
fn for_loop_runs_modules_in_order() {
    let root = module_root();
    let (mut sh, buf) = session(root.path());
    sh.execute("for i in 1..3 -> echo(n$i) |> shout");
    let out = text(&buf);
    assert!(out.contains("[0] N1"));
    assert!(out.contains("[1] N2"));
    assert!(out.contains("[2] N3"));
}

#[test]
fn search_and_info_use_metadata() {
    let root = module_root();
    let (mut sh, buf) = session(root.path());
    sh.execute("search text");
    sh.execute("info greet");
    let out = text(&buf);
    assert!(out.contains("Found 1 module(s)"));
    assert!(out.contains("who to greet"));
    assert!(out.contains("default: world"));
}
