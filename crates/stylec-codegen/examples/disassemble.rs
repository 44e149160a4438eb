use stylec_codegen::{EmitContext, ProcedureKind, ValueType};

fn parse_type(s: &str) -> Option<ValueType> {
    match s {
        "boolean" => Some(ValueType::Boolean),
        "int" => Some(ValueType::Int),
        "real" => Some(ValueType::Real),
        "string" => Some(ValueType::String),
        "node" => Some(ValueType::Node),
        "node-set" => Some(ValueType::NodeSet),
        "result-tree" => Some(ValueType::ResultTree),
        "reference" => Some(ValueType::Reference),
        _ => None,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: disassemble <source-type> <target-type>");
        eprintln!("  e.g. disassemble node-set boolean");
        std::process::exit(2);
    }
    let (Some(source), Some(target)) = (parse_type(&args[1]), parse_type(&args[2])) else {
        eprintln!("Unknown type name");
        std::process::exit(2);
    };

    let mut ctx = EmitContext::new(ProcedureKind::Template, "demo", vec![], ValueType::Void);
    if let Err(e) = source.convert_to(&mut ctx, &target) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    println!("{}", ctx.code());
}
