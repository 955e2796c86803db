use adaptive_lut::{errors::LUTError, grids::generator::{GenerationOptions, LookupTableGenerator}, serialization::SerializationFormat, storage::point_data::PointData};

///
/// One parameter, one QoI. Refine e^x on [0, 2] to an absolute error of 1e-4.
///
fn one_d() -> Result<(), LUTError>
{
    println!("\nRunning \"one_d\" example\n");
    let mut generator = LookupTableGenerator::new(1)?;
    generator.add_parameter("x", 0.0, 2.0)?;
    generator.add_qoi("exp", 1e-4)?;

    let f = |x: &[f64]| -> Result<PointData, LUTError> { Ok(PointData::success(vec![x[0].exp()])) };
    let converged = generator.generate(&f)?;
    println!("converged = {converged}, evaluations = {}, leaves = {}", generator.num_evaluations(), generator.num_leaves());

    let table = generator.lookup_table()?;
    for x in [0.3, 1.1, 1.97]
    {
        let value = table.interpolate_point(&[x])?[0];
        println!("x={x}, calculated {value}, expected {}. Error={}", x.exp(), (value - x.exp()).abs());
    }
    Ok(())
}

///
/// Two parameters, two QoIs, with a budget. The second QoI is only refined
/// once the first meets its tolerance. Stops on budget, saves, then resumes.
///
fn two_d() -> Result<(), LUTError>
{
    println!("\nRunning \"two_d\" example\n");
    let mut generator = LookupTableGenerator::with_options(2, GenerationOptions::new(200))?;
    generator.add_parameter("conductance", 0.5, 2.0)?;
    generator.add_parameter("stimulus", 10.0, 50.0)?;
    generator.add_qoi("peak", 1e-3)?;
    generator.add_qoi("duration", 1e-2)?;

    // stimuli below 15 fail to excite; report an error code with sentinel QoIs
    let f = |x: &[f64]| -> Result<PointData, LUTError>
    {
        if x[1] < 15.0
        {
            return Ok(PointData::new(vec![0.0, 0.0], 1));
        }
        Ok(PointData::success(vec![(x[0] * x[1]).sqrt(), 300.0 / (1.0 + x[0])]))
    };
    let converged = generator.generate(&f)?;
    println!("after budget: converged = {converged}, evaluations = {}, state = {:?}", generator.num_evaluations(), generator.state());

    let buffer = generator.write_buffer(SerializationFormat::BincodeLz4)?;
    let mut resumed = LookupTableGenerator::read_buffer(&buffer, SerializationFormat::BincodeLz4)?;
    resumed.set_max_num_evaluations(2000);
    let converged = resumed.generate(&f)?;
    println!("after resume: converged = {converged}, evaluations = {}, max generation = {}", resumed.num_evaluations(), resumed.max_generation());

    let failures = resumed.error_codes().iter().filter(|&&c| c != 0).count();
    println!("points with an error code: {failures}");
    let x = vec![1.3, 33.0];
    let value = resumed.interpolate(&[x.clone()])?;
    println!("x={x:?}, calculated {:?}, expected [{}, {}]", value[0], (x[0] * x[1]).sqrt(), 300.0 / (1.0 + x[0]));
    Ok(())
}

fn main()
{
    if let Err(e) = one_d()
    {
        eprintln!("one_d failed: {e}");
    }
    if let Err(e) = two_d()
    {
        eprintln!("two_d failed: {e}");
    }
}
