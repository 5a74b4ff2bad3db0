//! Interactive console.
//!
//! One command per line; SIGINT cancels the running command, a second SIGINT
//! at the prompt exits.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};

use meshcop_datasets::{Channel, JoinerType};
use meshcop_wire::{Error, Result};

use crate::app::CommissionerApp;

const USAGE: &str = "\
commands:
  start <ba-addr> <ba-port>          petition through the Border Agent
  stop                               resign and disconnect
  active                             print whether the session is active
  sessionid                          print the commissioner session ID
  borderagent                        print the Border Agent locator
  joiner enable <type> <eui64> <pskd> [url]
  joiner enableall <type> <pskd> [url]
  joiner disable <type> <eui64>
  joiner disableall <type>
  joiner list | joiner commissioned <type> <eui64>
  steering <type>                    print steering data (type: meshcop|ae|nmkp)
  joinerport <type> [port]           get/set the joiner UDP port
  channel [<page> <num> <delay-ms>]  get/set the channel
  channelmask [<mask-hex>]           get/set the channel mask
  networkname [name]                 get/set the network name
  panid [<panid> <delay-ms>]         get/set the PAN ID
  xpanid [hex8]                      get/set the extended PAN ID
  mlprefix [<prefix> <delay-ms>]     get/set the mesh-local prefix
  masterkey [<hex16> <delay-ms>]     get/set the network master key
  pskc [hex16]                       get/set the PSKc
  dataset <active|pending|comm|bbr>  print a dataset as JSON
  pull                               re-pull all datasets
  save <path>                        write network data as JSON
  panidquery <mask-hex> <panid> <dst>
  conflict <panid>                   print a recorded PAN ID conflict
  energyscan <mask-hex> <count> <period> <duration> <dst>
  reports                            print recorded energy reports
  announce <mask-hex> <count> <period> <dst>
  mlr <timeout-s> <addr>...          register multicast listeners
  token <request <addr> <port>|get>  CCM token flow
  ccm <reenroll|domainreset> <dst>
  ccm migrate <dst> <network>
  bbr <tri|registrar> [hostname]     get/set BBR hostnames
  bbr addr                           print the registrar IPv6 address
  exit";

/// Run the console until EOF or exit.
pub async fn run(app: &mut CommissionerApp) -> anyhow::Result<()> {
    let abort = app.abort_handle();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        tokio::select! {
            result = execute(app, line) => match result {
                Ok(output) => println!("{output}"),
                Err(err) => println!("error: {err}"),
            },
            _ = tokio::signal::ctrl_c() => {
                abort.abort();
                println!("cancelled");
            }
        }
    }

    app.stop().await;
    Ok(())
}

fn joiner_type(token: &str) -> Result<JoinerType> {
    match token {
        "meshcop" => Ok(JoinerType::MeshCoP),
        "ae" => Ok(JoinerType::Ae),
        "nmkp" => Ok(JoinerType::Nmkp),
        other => Err(Error::invalid_args(format!(
            "unknown joiner type {other} (expected meshcop|ae|nmkp)"
        ))),
    }
}

fn parse<T: std::str::FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| Error::invalid_args(format!("bad {what}: {token}")))
}

fn parse_hex_u64(token: &str, what: &str) -> Result<u64> {
    u64::from_str_radix(token.trim_start_matches("0x"), 16)
        .map_err(|_| Error::invalid_args(format!("bad {what}: {token}")))
}

fn parse_hex_u32(token: &str, what: &str) -> Result<u32> {
    u32::from_str_radix(token.trim_start_matches("0x"), 16)
        .map_err(|_| Error::invalid_args(format!("bad {what}: {token}")))
}

fn parse_hex_array<const N: usize>(token: &str, what: &str) -> Result<[u8; N]> {
    hex::decode(token)
        .map_err(|_| Error::invalid_args(format!("bad {what}: {token}")))?
        .try_into()
        .map_err(|_| Error::invalid_args(format!("{what} must be {N} bytes")))
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| Error::internal(err.to_string()))
}

fn arg<'a>(args: &[&'a str], index: usize, what: &str) -> Result<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| Error::invalid_args(format!("missing {what}")))
}

async fn execute(app: &mut CommissionerApp, line: &str) -> Result<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (command, args) = tokens.split_first().expect("line is not empty");

    match *command {
        "help" => Ok(USAGE.to_string()),

        "start" => {
            let addr = arg(args, 0, "border agent address")?;
            let port: u16 = parse(arg(args, 1, "border agent port")?, "port")?;
            match app.start(addr, port).await {
                Ok(()) => Ok(format!("session {} active", app.session_id()?)),
                Err(err) => match app.existing_commissioner_id() {
                    Some(id) => Err(Error::new(
                        err.kind(),
                        format!("{} (existing commissioner: {id})", err.message()),
                    )),
                    None => Err(err),
                },
            }
        }
        "stop" => {
            app.stop().await;
            Ok("stopped".to_string())
        }
        "active" => Ok(app.is_active().to_string()),
        "sessionid" => Ok(app.session_id()?.to_string()),
        "borderagent" => Ok(format!("{:#06x}", app.border_agent_locator()?)),

        "joiner" => match arg(args, 0, "joiner subcommand")? {
            "enable" => {
                let typ = joiner_type(arg(args, 1, "joiner type")?)?;
                let eui64 = parse_hex_u64(arg(args, 2, "EUI-64")?, "EUI-64")?;
                let pskd = arg(args, 3, "PSKd")?;
                let url = args.get(4).copied().unwrap_or("");
                app.enable_joiner(typ, eui64, pskd, url).await?;
                Ok("joiner enabled".to_string())
            }
            "enableall" => {
                let typ = joiner_type(arg(args, 1, "joiner type")?)?;
                let pskd = arg(args, 2, "PSKd")?;
                let url = args.get(3).copied().unwrap_or("");
                app.enable_all_joiners(typ, pskd, url).await?;
                Ok("all joiners enabled".to_string())
            }
            "disable" => {
                let typ = joiner_type(arg(args, 1, "joiner type")?)?;
                let eui64 = parse_hex_u64(arg(args, 2, "EUI-64")?, "EUI-64")?;
                app.disable_joiner(typ, eui64).await?;
                Ok("joiner disabled".to_string())
            }
            "disableall" => {
                let typ = joiner_type(arg(args, 1, "joiner type")?)?;
                app.disable_all_joiners(typ).await?;
                Ok("all joiners disabled".to_string())
            }
            "list" => {
                let joiners = app.joiners();
                if joiners.is_empty() {
                    return Ok("no joiners".to_string());
                }
                Ok(joiners
                    .iter()
                    .map(|info| {
                        format!(
                            "{} eui64={:#018x} commissioned={}",
                            info.joiner_type, info.eui64, info.commissioned
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            "commissioned" => {
                let typ = joiner_type(arg(args, 1, "joiner type")?)?;
                let eui64 = parse_hex_u64(arg(args, 2, "EUI-64")?, "EUI-64")?;
                Ok(app.is_joiner_commissioned(typ, eui64).to_string())
            }
            other => Err(Error::invalid_args(format!("unknown joiner command {other}"))),
        },

        "steering" => {
            let typ = joiner_type(arg(args, 0, "joiner type")?)?;
            Ok(hex::encode(app.get_steering_data(typ)?.as_bytes()))
        }
        "joinerport" => {
            let typ = joiner_type(arg(args, 0, "joiner type")?)?;
            match args.get(1) {
                None => Ok(app.get_joiner_udp_port(typ)?.to_string()),
                Some(token) => {
                    app.set_joiner_udp_port(typ, parse(token, "port")?).await?;
                    Ok("done".to_string())
                }
            }
        }

        "channel" => {
            if args.is_empty() {
                let channel = app.get_channel().await?;
                Ok(format!("page {} channel {}", channel.page, channel.number))
            } else {
                let page: u8 = parse(arg(args, 0, "page")?, "page")?;
                let number: u16 = parse(arg(args, 1, "channel")?, "channel")?;
                let delay: u32 = parse(arg(args, 2, "delay")?, "delay")?;
                app.set_channel(Channel { page, number }, delay).await?;
                Ok("done".to_string())
            }
        }
        "channelmask" => match args.first() {
            None => {
                let mask = app.get_channel_mask()?;
                Ok(json(&mask)?)
            }
            Some(token) => {
                let bits = parse_hex_u32(token, "channel mask")?;
                app.set_channel_mask(meshcop_datasets::ChannelMask::from_bits(0, bits))
                    .await?;
                Ok("done".to_string())
            }
        },
        "networkname" => match args.first() {
            None => app.get_network_name(),
            Some(name) => {
                app.set_network_name(name).await?;
                Ok("done".to_string())
            }
        },
        "panid" => {
            if args.is_empty() {
                Ok(format!("{:#06x}", app.get_pan_id().await?))
            } else {
                let pan_id = parse_hex_u32(arg(args, 0, "PAN ID")?, "PAN ID")? as u16;
                let delay: u32 = parse(arg(args, 1, "delay")?, "delay")?;
                app.set_pan_id(pan_id, delay).await?;
                Ok("done".to_string())
            }
        }
        "xpanid" => match args.first() {
            None => Ok(hex::encode(app.get_extended_pan_id()?)),
            Some(token) => {
                app.set_extended_pan_id(parse_hex_array(token, "extended PAN ID")?)
                    .await?;
                Ok("done".to_string())
            }
        },
        "mlprefix" => {
            if args.is_empty() {
                app.get_mesh_local_prefix().await
            } else {
                let prefix = arg(args, 0, "prefix")?;
                let delay: u32 = parse(arg(args, 1, "delay")?, "delay")?;
                app.set_mesh_local_prefix(prefix, delay).await?;
                Ok("done".to_string())
            }
        }
        "masterkey" => {
            if args.is_empty() {
                Ok(hex::encode(app.get_network_master_key().await?))
            } else {
                let key = parse_hex_array(arg(args, 0, "master key")?, "master key")?;
                let delay: u32 = parse(arg(args, 1, "delay")?, "delay")?;
                app.set_network_master_key(key, delay).await?;
                Ok("done".to_string())
            }
        }
        "pskc" => match args.first() {
            None => Ok(hex::encode(app.get_pskc()?)),
            Some(token) => {
                app.set_pskc(parse_hex_array(token, "PSKc")?).await?;
                Ok("done".to_string())
            }
        },

        "dataset" => match arg(args, 0, "dataset kind")? {
            "active" => json(&app.get_active_dataset()?),
            "pending" => json(&app.get_pending_dataset()?),
            "comm" => json(&app.get_commissioner_dataset()?),
            "bbr" => json(&app.get_bbr_dataset()?),
            other => Err(Error::invalid_args(format!("unknown dataset {other}"))),
        },
        "pull" => {
            app.pull_network_data().await?;
            Ok("done".to_string())
        }
        "save" => {
            app.save_network_data(arg(args, 0, "path")?)?;
            Ok("saved".to_string())
        }

        "panidquery" => {
            let mask = parse_hex_u32(arg(args, 0, "channel mask")?, "channel mask")?;
            let pan_id = parse_hex_u32(arg(args, 1, "PAN ID")?, "PAN ID")? as u16;
            let dst = arg(args, 2, "destination")?;
            app.pan_id_query(mask, pan_id, dst).await?;
            Ok("query sent".to_string())
        }
        "conflict" => {
            let pan_id = parse_hex_u32(arg(args, 0, "PAN ID")?, "PAN ID")? as u16;
            match app.pan_id_conflict(pan_id) {
                Some(mask) => Ok(json(&mask)?),
                None => Ok("no conflict recorded".to_string()),
            }
        }
        "energyscan" => {
            let mask = parse_hex_u32(arg(args, 0, "channel mask")?, "channel mask")?;
            let count: u8 = parse(arg(args, 1, "count")?, "count")?;
            let period: u16 = parse(arg(args, 2, "period")?, "period")?;
            let duration: u16 = parse(arg(args, 3, "scan duration")?, "scan duration")?;
            let dst = arg(args, 4, "destination")?;
            app.energy_scan(mask, count, period, duration, dst).await?;
            Ok("scan requested".to_string())
        }
        "reports" => {
            let reports = app.energy_reports();
            if reports.is_empty() {
                return Ok("no energy reports".to_string());
            }
            Ok(reports
                .iter()
                .map(|(peer, report)| {
                    format!("{peer}: {} energy samples", report.energy_list.len())
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "announce" => {
            let mask = parse_hex_u32(arg(args, 0, "channel mask")?, "channel mask")?;
            let count: u8 = parse(arg(args, 1, "count")?, "count")?;
            let period: u16 = parse(arg(args, 2, "period")?, "period")?;
            let dst = arg(args, 3, "destination")?;
            app.announce_begin(mask, count, period, dst).await?;
            Ok("announce sent".to_string())
        }
        "mlr" => {
            let timeout: u32 = parse(arg(args, 0, "timeout")?, "timeout")?;
            if args.len() < 2 {
                return Err(Error::invalid_args("missing multicast addresses"));
            }
            let addrs: Vec<String> = args[1..].iter().map(|s| s.to_string()).collect();
            app.register_multicast_listeners(&addrs, timeout).await?;
            Ok("listeners registered".to_string())
        }

        "token" => match arg(args, 0, "token subcommand")? {
            "request" => {
                let addr = arg(args, 1, "registrar address")?;
                let port: u16 = parse(arg(args, 2, "registrar port")?, "port")?;
                let token = app.request_token(addr, port).await?;
                Ok(format!("received {}-byte token", token.len()))
            }
            "get" => match app.get_token() {
                Some(token) => Ok(hex::encode(token)),
                None => Ok("no token".to_string()),
            },
            other => Err(Error::invalid_args(format!("unknown token command {other}"))),
        },

        "ccm" => match arg(args, 0, "ccm subcommand")? {
            "reenroll" => {
                app.reenroll(arg(args, 1, "destination")?).await?;
                Ok("reenroll sent".to_string())
            }
            "domainreset" => {
                app.domain_reset(arg(args, 1, "destination")?).await?;
                Ok("domain reset sent".to_string())
            }
            "migrate" => {
                let dst = arg(args, 1, "destination")?;
                let network = arg(args, 2, "designated network")?;
                app.migrate(dst, network).await?;
                Ok("migrate sent".to_string())
            }
            other => Err(Error::invalid_args(format!("unknown ccm command {other}"))),
        },

        "bbr" => match arg(args, 0, "bbr subcommand")? {
            "tri" => match args.get(1) {
                None => app.get_tri_hostname(),
                Some(name) => {
                    app.set_tri_hostname(name).await?;
                    Ok("done".to_string())
                }
            },
            "registrar" => match args.get(1) {
                None => app.get_registrar_hostname(),
                Some(name) => {
                    app.set_registrar_hostname(name).await?;
                    Ok("done".to_string())
                }
            },
            "addr" => app.get_registrar_ipv6_addr(),
            other => Err(Error::invalid_args(format!("unknown bbr command {other}"))),
        },

        other => Err(Error::invalid_args(format!(
            "unknown command {other} (try \"help\")"
        ))),
    }
}
