use diffbench::backend::backends;
use diffbench::checkpoints::known_checkpoints;
use diffbench::PipelineVariant;

pub fn list_pipelines() {
    let width = PipelineVariant::ALL
        .iter()
        .map(|v| v.name().len())
        .max()
        .unwrap_or(0);
    println!("variant {} => default checkpoint", " ".repeat(width - "variant".len()));
    println!("{}", "-".repeat(width + 24));
    for variant in PipelineVariant::ALL {
        println!(
            "{}{} => {}",
            variant.name(),
            " ".repeat(width - variant.name().len() + 1),
            variant.default_checkpoint()
        );
    }

    println!();
    let checkpoints = known_checkpoints();
    let width = checkpoints.iter().map(|c| c.id.len()).max().unwrap_or(0);
    println!("checkpoint {} => resolution", " ".repeat(width - "checkpoint".len()));
    println!("{}", "-".repeat(width + 16));
    for info in checkpoints {
        println!(
            "{}{} => {}",
            info.id,
            " ".repeat(width - info.id.len() + 1),
            info.resolution
        );
    }

    println!();
    for backend in backends() {
        let variants: Vec<&str> = backend.variants.iter().map(|v| v.name()).collect();
        println!("{}: {} [{}]", backend.name, backend.description, variants.join(", "));
    }
}
