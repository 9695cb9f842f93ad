use cminus::frontend::lexer::Lexer;
use cminus::frontend::parser::Parser;
use cminus::middle::codegen::CodeGenerator;
use cminus::middle::ir::LabelId;
use cminus::middle::printer::print_listing;
use cminus::types::Type;
use cminus::{compile, Error, Instruction};
use pretty_assertions::assert_eq;

const SIEVE: &str = r#"
// primes below a bound
int limit : 50;

/* marks composites
   in place */
sieve(bool composite[]; int n)
{
    int i; int j;
    for i = 2 to n - 1 do {
        if composite[i] then ;
        else {
            j = i * i;
            while j < n do {
                composite[j] = true;
                j += i;
            }
        }
    }
}

int count(bool composite[]; int n)
{
    int i; int found : 0;
    for i = 2 to n - 1 do
        if not composite[i] then found++;
    return found;
}

int main()
{
    bool composite[50] : false;
    sieve(composite, limit);
    print("%d primes\n", count(composite, limit));
    return 0;
}
"#;

#[test]
fn compiles_a_whole_program() {
    let image = compile(SIEVE).unwrap();

    let names: Vec<&str> = image
        .all_functions()
        .iter()
        .map(|(sig, _)| sig.name.as_str())
        .collect();
    assert_eq!(names, vec!["sieve", "count", "main"]);

    let main = image.entry_point().unwrap();
    assert_eq!(main.return_type, Type::Int);
    assert_eq!(main.handle.0, 2);

    let sieve = image.function("sieve").unwrap();
    assert_eq!(sieve.signature.param_types, vec![Type::array_of(Type::Bool), Type::Int]);
    assert_eq!(&sieve.locals[..2], &[Type::Int, Type::Int]);
    assert_eq!(sieve.instructions.last(), Some(&Instruction::Return));

    assert_eq!(image.statics, vec![Type::Int]);
    assert_eq!(
        image.static_init,
        vec![Instruction::PushInt(50), Instruction::StoreStatic(0)]
    );

    for function in &image.functions {
        assert_eq!(function.unresolved_labels(), Vec::<LabelId>::new());
    }
}

#[test]
fn main_fills_its_array_then_calls() {
    let image = compile(SIEVE).unwrap();
    let main = image.function("main").unwrap();
    assert_eq!(main.locals, vec![Type::array_of(Type::Bool), Type::Bool, Type::Int]);

    let main = &main.instructions;
    let stores = main
        .iter()
        .filter(|i| **i == Instruction::StoreElem(Type::Bool))
        .count();
    assert_eq!(stores, 1);
    assert!(main.contains(&Instruction::PushInt(50)));
    assert!(main.contains(&Instruction::Lt));
    assert!(main.contains(&Instruction::PrintFormatted { args: 1 }));
    assert!(main.contains(&Instruction::Box(Type::Int)));
}

#[test]
fn generate_function_returns_code_and_type() {
    let program = Parser::new(Lexer::new("char first(string s) { return 'a'; }"))
        .parse_program()
        .unwrap();
    let mut generator = CodeGenerator::new();
    let (code, ty) = generator.generate_function(&program.children[0]).unwrap();
    assert_eq!(ty, Type::Char);
    assert_eq!(code, vec![Instruction::PushChar('a'), Instruction::Return]);
    assert!(generator.functions().lookup("first").is_some());
}

#[test]
fn first_error_aborts_compilation() {
    let source = "int main() {\n  int x;\n  x = undefined + 1;\n  return true;\n}";
    assert_eq!(
        compile(source).unwrap_err(),
        Error::UndeclaredName { name: "undefined".into(), line: 3 }
    );
}

#[test]
fn syntax_errors_carry_a_line() {
    let err = compile("int main() {\n  return (1 + 2;\n}").unwrap_err();
    assert!(matches!(err, Error::Syntax { line: 2, .. }), "{:?}", err);
    assert_eq!(err.line(), Some(2));
}

#[test]
fn comments_do_not_change_the_output() {
    let plain = compile("int main() { int a; a = 1; return a; }").unwrap();
    let commented = compile(
        "int /* type */ main() // entry\n{ int a; /* many\n lines */ a = 1; return a; }",
    )
    .unwrap();
    assert_eq!(plain, commented);
}

#[test]
fn program_image_serializes() {
    let image = compile("int main() { return 1 :<: 2; }").unwrap();
    let json = serde_json::to_value(&image).unwrap();
    assert_eq!(json["functions"][0]["signature"]["name"], "main");
    assert_eq!(json["functions"][0]["instructions"][2], "Min");
}

#[test]
fn listing_shows_every_function() {
    let listing = print_listing(&compile(SIEVE).unwrap());
    assert!(listing.contains("fn sieve(bool[], int) -> void {"));
    assert!(listing.contains("fn count(bool[], int) -> int {"));
    assert!(listing.contains("    call count\n"));
}
