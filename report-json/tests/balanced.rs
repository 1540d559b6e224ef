use report_json::{DecodeCallbacks, Encoder, JsonError, MAX_CONTAINER_DEPTH, decode, validate};

/// Small deterministic generator so failures are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

/// Parses with serde_json, whose default recursion limit of 128 is lower than
/// the depth the encoder allows
fn parse_deep(data: &[u8]) -> serde_json::Result<serde_json::Value> {
    use serde::Deserialize;

    let mut de = serde_json::Deserializer::from_slice(data);
    de.disable_recursion_limit();
    let value = serde_json::Value::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

#[test]
fn maximum_nesting_is_valid_json() {
    // Objects hold named arrays, arrays hold unnamed objects
    let mut enc = Encoder::new(Vec::new(), false);
    enc.begin_object(None).unwrap();
    for i in 1..MAX_CONTAINER_DEPTH {
        if i % 2 == 1 {
            enc.begin_array(Some("a")).unwrap();
        } else {
            enc.begin_object(None).unwrap();
        }
    }
    assert_eq!(enc.depth(), MAX_CONTAINER_DEPTH);
    assert_eq!(enc.begin_array(None), Err(JsonError::NestingTooDeep));
    enc.add_boolean(None, true).unwrap();
    enc.end_encode().unwrap();

    let out = enc.into_inner();
    validate(&out).unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&out).is_err());

    let parsed = parse_deep(&out).unwrap();
    let mut value = &parsed;
    for i in 1..MAX_CONTAINER_DEPTH {
        value = if i % 2 == 1 { &value["a"] } else { &value[0] };
    }
    assert_eq!(value[0], true);
}

#[test]
fn arbitrary_nesting_is_valid_json() {
    for seed in 0..64 {
        let mut rng = Lcg(seed);
        let mut enc = Encoder::new(Vec::new(), seed % 2 == 0);
        enc.begin_object(None).unwrap();

        for i in 0..500u64 {
            let name = format!("k{i}");
            match rng.next() % 6 {
                0 if enc.depth() < MAX_CONTAINER_DEPTH => enc.begin_object(Some(&name)).unwrap(),
                1 if enc.depth() < MAX_CONTAINER_DEPTH => enc.begin_array(Some(&name)).unwrap(),
                2 if enc.depth() > 1 => enc.end_container().unwrap(),
                3 => enc.add_unsigned(Some(&name), rng.next() << 31).unwrap(),
                4 => enc.add_string(Some(&name), Some("v\"\n")).unwrap(),
                _ => enc.add_float(Some(&name), rng.next() as f64 / 7.0).unwrap(),
            }
        }

        enc.end_encode().unwrap();
        let out = enc.into_inner();
        if let Err(e) = parse_deep(&out) {
            panic!("seed {seed} produced invalid JSON: {e}");
        }
        if let Err(e) = validate(&out) {
            panic!("seed {seed} failed to decode: {e}");
        }
    }
}

#[test]
fn truncated_output_is_prefix_valid() {
    // Every section written before the cut must survive a re-ingest
    let mut enc = Encoder::new(Vec::new(), false);
    enc.begin_object(None).unwrap();
    enc.begin_object(Some("report")).unwrap();
    enc.add_string(Some("type"), Some("standard")).unwrap();
    enc.end_container().unwrap();
    enc.begin_object(Some("crash")).unwrap();
    enc.begin_array(Some("threads")).unwrap();
    enc.begin_object(None).unwrap();
    enc.add_integer(Some("index"), 0).unwrap();

    let full = enc.into_inner();
    let cut = &full[..full.len() - 3];

    struct Sections {
        names: Vec<String>,
        depth: usize,
    }

    impl DecodeCallbacks for Sections {
        fn on_begin_object(&mut self, name: Option<&str>) -> Result<(), JsonError> {
            if self.depth == 1 {
                self.names.push(name.unwrap_or_default().to_owned());
            }
            self.depth += 1;
            Ok(())
        }

        fn on_begin_array(&mut self, _name: Option<&str>) -> Result<(), JsonError> {
            self.depth += 1;
            Ok(())
        }

        fn on_end_container(&mut self) -> Result<(), JsonError> {
            self.depth -= 1;
            Ok(())
        }
    }

    let mut sections = Sections {
        names: Vec::new(),
        depth: 0,
    };
    let mut buf = [0u8; 1024];
    let err = decode(cut, &mut buf, &mut sections).unwrap_err();
    assert_eq!(err.kind, JsonError::Incomplete);
    assert_eq!(sections.names, ["report", "crash"]);

    let mut embed = Encoder::new(Vec::new(), false);
    embed.begin_object(None).unwrap();
    let res = embed.add_json_document(Some("recrash_report"), cut, false);
    assert_eq!(res, Err(JsonError::Incomplete));
    embed.add_boolean(Some("incomplete"), true).unwrap();
    embed.end_encode().unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&embed.into_inner()).unwrap();
    assert_eq!(parsed["recrash_report"]["report"]["type"], "standard");
    assert_eq!(parsed["recrash_report"]["incomplete"], true);
}
