use groundlink_link::radio::props;
use serde::Serialize;

use crate::cmd::RadioPropsArgs;
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::input::to_hex;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct PropertyOutput<'a> {
    name: &'a str,
    group: u8,
    start: u8,
    count: u8,
    values: String,
}

pub fn run(args: RadioPropsArgs, format: OutputFormat) -> CliResult<i32> {
    let properties = props::load(&args.path)
        .map_err(|err| config_error("radio properties rejected", err))?;

    match format {
        OutputFormat::Json => {
            let out: Vec<PropertyOutput<'_>> = properties
                .iter()
                .map(|p| PropertyOutput {
                    name: &p.name,
                    group: p.group,
                    start: p.start,
                    count: p.count,
                    values: to_hex(&p.values),
                })
                .collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = comfy_table::Table::new();
            table
                .load_preset(comfy_table::presets::UTF8_FULL)
                .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "GROUP", "START", "COUNT", "VALUES"]);
            for p in &properties {
                table.add_row(vec![
                    p.name.clone(),
                    format!("0x{:02x}", p.group),
                    format!("0x{:02x}", p.start),
                    p.count.to_string(),
                    to_hex(&p.values),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for p in &properties {
                println!("{p}");
            }
        }
    }

    Ok(SUCCESS)
}
